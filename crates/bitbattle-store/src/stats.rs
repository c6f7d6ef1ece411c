use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{RatingBucket, UserStats};
use crate::users::{parse_timestamp, parse_uuid};

impl Database {
    pub fn get_stats(&self, user_id: Uuid) -> Result<Option<UserStats>> {
        get_stats(self.conn(), user_id)
    }
}

const STATS_COLUMNS: &str = "user_id, games_played, games_won, games_lost, problems_solved, \
     fastest_solve_ms, current_streak, longest_streak, last_played_at, \
     easy_rating, easy_peak_rating, easy_ranked_games, easy_ranked_wins, \
     medium_rating, medium_peak_rating, medium_ranked_games, medium_ranked_wins, \
     hard_rating, hard_peak_rating, hard_ranked_games, hard_ranked_wins";

pub(crate) fn get_stats(conn: &Connection, user_id: Uuid) -> Result<Option<UserStats>> {
    conn.query_row(
        &format!("SELECT {STATS_COLUMNS} FROM user_stats WHERE user_id = ?1"),
        params![user_id.to_string()],
        row_to_stats,
    )
    .optional()
    .map_err(StoreError::from)
}

pub(crate) fn insert_default_stats(conn: &Connection, user_id: Uuid) -> Result<()> {
    conn.execute(
        "INSERT INTO user_stats (user_id) VALUES (?1)",
        params![user_id.to_string()],
    )?;
    Ok(())
}

/// Write every mutable stats field back. Used inside the per-game
/// transaction after the fields were updated in memory.
pub(crate) fn update_stats(conn: &Connection, stats: &UserStats) -> Result<()> {
    let affected = conn.execute(
        "UPDATE user_stats SET
            games_played = ?2, games_won = ?3, games_lost = ?4,
            problems_solved = ?5, fastest_solve_ms = ?6,
            current_streak = ?7, longest_streak = ?8, last_played_at = ?9,
            easy_rating = ?10, easy_peak_rating = ?11,
            easy_ranked_games = ?12, easy_ranked_wins = ?13,
            medium_rating = ?14, medium_peak_rating = ?15,
            medium_ranked_games = ?16, medium_ranked_wins = ?17,
            hard_rating = ?18, hard_peak_rating = ?19,
            hard_ranked_games = ?20, hard_ranked_wins = ?21
         WHERE user_id = ?1",
        params![
            stats.user_id.to_string(),
            stats.games_played,
            stats.games_won,
            stats.games_lost,
            stats.problems_solved,
            stats.fastest_solve_ms,
            stats.current_streak,
            stats.longest_streak,
            stats.last_played_at.map(|t| t.to_rfc3339()),
            stats.easy.rating,
            stats.easy.peak_rating,
            stats.easy.ranked_games,
            stats.easy.ranked_wins,
            stats.medium.rating,
            stats.medium.peak_rating,
            stats.medium.ranked_games,
            stats.medium.ranked_wins,
            stats.hard.rating,
            stats.hard.peak_rating,
            stats.hard.ranked_games,
            stats.hard.ranked_wins,
        ],
    )?;
    if affected == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

fn row_to_stats(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserStats> {
    let id_str: String = row.get(0)?;
    let last_played: Option<String> = row.get(8)?;

    let bucket = |base: usize| -> rusqlite::Result<RatingBucket> {
        Ok(RatingBucket {
            rating: row.get(base)?,
            peak_rating: row.get(base + 1)?,
            ranked_games: row.get(base + 2)?,
            ranked_wins: row.get(base + 3)?,
        })
    };

    Ok(UserStats {
        user_id: parse_uuid(&id_str, 0)?,
        games_played: row.get(1)?,
        games_won: row.get(2)?,
        games_lost: row.get(3)?,
        problems_solved: row.get(4)?,
        fastest_solve_ms: row.get(5)?,
        current_streak: row.get(6)?,
        longest_streak: row.get(7)?,
        last_played_at: last_played
            .map(|value| parse_timestamp(&value, 8))
            .transpose()?,
        easy: bucket(9)?,
        medium: bucket(13)?,
        hard: bucket(17)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn stats_round_trip() {
        let mut db = Database::open_in_memory().unwrap();
        let user = db.create_user("a@example.com", "a", None).unwrap();

        let mut stats = db.get_stats(user.id).unwrap().unwrap();
        stats.games_played = 3;
        stats.games_won = 2;
        stats.current_streak = 2;
        stats.longest_streak = 2;
        stats.fastest_solve_ms = Some(4200);
        stats.last_played_at = Some(Utc::now());
        stats.hard.rating = 1216;
        stats.hard.peak_rating = 1216;
        stats.hard.ranked_games = 1;
        stats.hard.ranked_wins = 1;

        update_stats(db.conn(), &stats).unwrap();

        let fetched = db.get_stats(user.id).unwrap().unwrap();
        assert_eq!(fetched.games_played, 3);
        assert_eq!(fetched.fastest_solve_ms, Some(4200));
        assert_eq!(fetched.hard.rating, 1216);
        assert_eq!(fetched.easy.rating, 1200);
        assert!(fetched.last_played_at.is_some());
    }

    #[test]
    fn updating_unknown_user_fails() {
        let db = Database::open_in_memory().unwrap();
        let stats = UserStats::new(Uuid::new_v4());
        assert!(matches!(
            update_stats(db.conn(), &stats),
            Err(StoreError::NotFound)
        ));
    }
}
