//! Durable recording of a finished game.
//!
//! Everything one game produces -- the per-participant result rows, the
//! stats updates and the ranked rating movements -- is written in a single
//! transaction so a crash can never leave half a game behind.

use std::collections::HashMap;

use chrono::Utc;
use rusqlite::Connection;
use uuid::Uuid;

use bitbattle_shared::{Difficulty, GameMode, Language, RatingChange};

use crate::database::Database;
use crate::error::Result;
use crate::game_results::insert_game_result;
use crate::models::{GameResult, UserStats};
use crate::{elo, stats};

/// One participant of a finished game, in placement order context.
#[derive(Debug, Clone)]
pub struct ParticipantOutcome {
    pub username: String,
    /// `None` for guests; guests get a result row but no stats or rating.
    pub user_id: Option<Uuid>,
    pub passed_tests: i32,
    pub total_tests: i32,
    pub language: Option<Language>,
}

/// A finished game with a winner. Abandoned games are never recorded.
#[derive(Debug, Clone)]
pub struct GameOutcome {
    pub room_id: String,
    pub problem_id: String,
    pub game_mode: GameMode,
    pub difficulty: Difficulty,
    /// Winner's wall-clock solve time.
    pub solve_time_ms: Option<i64>,
    /// Placement order; index 0 is the winner.
    pub participants: Vec<ParticipantOutcome>,
}

impl Database {
    /// Record a finished game and return the rating movement per username.
    ///
    /// Casual games record zero deltas and leave every rating field alone.
    /// Ranked games apply K=32 pairwise ELO between the winner and each
    /// loser on the difficulty-specific bucket; each pair is zero-sum.
    pub fn record_game(&mut self, outcome: &GameOutcome) -> Result<HashMap<String, RatingChange>> {
        if outcome.participants.is_empty() {
            return Ok(HashMap::new());
        }

        let tx = self.conn_mut().transaction()?;

        // Pre-game ratings, read under the same transaction that updates
        // them. Guests play at the fixed default.
        let mut player_stats: HashMap<Uuid, UserStats> = HashMap::new();
        let mut ratings: Vec<i32> = Vec::with_capacity(outcome.participants.len());
        for participant in &outcome.participants {
            let rating = match participant.user_id {
                Some(user_id) => {
                    let stats = load_or_create_stats(&tx, user_id)?;
                    let rating = stats.bucket(outcome.difficulty).rating;
                    player_stats.insert(user_id, stats);
                    rating
                }
                None => 1200,
            };
            ratings.push(rating);
        }

        let deltas = rating_deltas(outcome.game_mode, &ratings);

        let now = Utc::now();
        let total_players = outcome.participants.len() as i32;
        let mut changes = HashMap::new();

        for (index, participant) in outcome.participants.iter().enumerate() {
            let placement = index as i32 + 1;
            let is_winner = index == 0;
            let change = deltas[index];

            insert_game_result(
                &tx,
                &GameResult {
                    id: Uuid::new_v4(),
                    room_id: outcome.room_id.clone(),
                    problem_id: outcome.problem_id.clone(),
                    user_id: participant.user_id,
                    placement,
                    total_players,
                    solve_time_ms: if is_winner { outcome.solve_time_ms } else { None },
                    passed_tests: participant.passed_tests,
                    total_tests: participant.total_tests,
                    language: participant.language.map(|l| l.as_str().to_string()),
                    game_mode: outcome.game_mode,
                    difficulty: outcome.difficulty,
                    rating_change: change,
                    created_at: now,
                },
            )?;

            if let Some(stats) = participant.user_id.and_then(|id| player_stats.get_mut(&id)) {
                apply_to_stats(stats, outcome, is_winner, change);
                stats::update_stats(&tx, stats)?;
            }

            changes.insert(
                participant.username.clone(),
                RatingChange {
                    old_rating: ratings[index],
                    new_rating: ratings[index] + change,
                    change,
                },
            );
        }

        tx.commit()?;
        Ok(changes)
    }
}

/// Per-participant rating deltas in placement order. Index 0 is the winner.
fn rating_deltas(mode: GameMode, ratings: &[i32]) -> Vec<i32> {
    let mut deltas = vec![0i32; ratings.len()];
    if mode != GameMode::Ranked || ratings.len() < 2 {
        return deltas;
    }

    let winner_rating = ratings[0];
    for (index, &loser_rating) in ratings.iter().enumerate().skip(1) {
        let transfer = elo::pair_delta(winner_rating, loser_rating);
        deltas[0] += transfer;
        deltas[index] = -transfer;
    }
    deltas
}

fn load_or_create_stats(conn: &Connection, user_id: Uuid) -> Result<UserStats> {
    if let Some(stats) = stats::get_stats(conn, user_id)? {
        return Ok(stats);
    }
    stats::insert_default_stats(conn, user_id)?;
    Ok(UserStats::new(user_id))
}

fn apply_to_stats(stats: &mut UserStats, outcome: &GameOutcome, is_winner: bool, change: i32) {
    stats.games_played += 1;
    stats.last_played_at = Some(Utc::now());

    if is_winner {
        stats.games_won += 1;
        stats.problems_solved += 1;
        stats.current_streak += 1;
        stats.longest_streak = stats.longest_streak.max(stats.current_streak);
        if let Some(solve_time) = outcome.solve_time_ms {
            stats.fastest_solve_ms = Some(match stats.fastest_solve_ms {
                Some(best) => best.min(solve_time),
                None => solve_time,
            });
        }
    } else {
        stats.games_lost += 1;
        stats.current_streak = 0;
    }

    if outcome.game_mode == GameMode::Ranked {
        let bucket = stats.bucket_mut(outcome.difficulty);
        bucket.rating += change;
        bucket.peak_rating = bucket.peak_rating.max(bucket.rating);
        bucket.ranked_games += 1;
        if is_winner {
            bucket.ranked_wins += 1;
        }
    }
}
