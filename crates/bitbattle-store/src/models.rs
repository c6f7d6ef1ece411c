use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use bitbattle_shared::{Difficulty, GameMode};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One rating track. Ratings start at 1200 and `peak_rating` never drops
/// below `rating`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RatingBucket {
    pub rating: i32,
    pub peak_rating: i32,
    pub ranked_games: i32,
    pub ranked_wins: i32,
}

impl Default for RatingBucket {
    fn default() -> Self {
        Self {
            rating: 1200,
            peak_rating: 1200,
            ranked_games: 0,
            ranked_wins: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserStats {
    pub user_id: Uuid,
    pub games_played: i32,
    pub games_won: i32,
    pub games_lost: i32,
    pub problems_solved: i32,
    pub fastest_solve_ms: Option<i64>,
    pub current_streak: i32,
    pub longest_streak: i32,
    pub last_played_at: Option<DateTime<Utc>>,
    pub easy: RatingBucket,
    pub medium: RatingBucket,
    pub hard: RatingBucket,
}

impl UserStats {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            games_played: 0,
            games_won: 0,
            games_lost: 0,
            problems_solved: 0,
            fastest_solve_ms: None,
            current_streak: 0,
            longest_streak: 0,
            last_played_at: None,
            easy: RatingBucket::default(),
            medium: RatingBucket::default(),
            hard: RatingBucket::default(),
        }
    }

    pub fn bucket(&self, difficulty: Difficulty) -> &RatingBucket {
        match difficulty {
            Difficulty::Easy => &self.easy,
            Difficulty::Medium => &self.medium,
            Difficulty::Hard => &self.hard,
        }
    }

    pub fn bucket_mut(&mut self, difficulty: Difficulty) -> &mut RatingBucket {
        match difficulty {
            Difficulty::Easy => &mut self.easy,
            Difficulty::Medium => &mut self.medium,
            Difficulty::Hard => &mut self.hard,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GameResult {
    pub id: Uuid,
    pub room_id: String,
    pub problem_id: String,
    /// `None` for guest players.
    pub user_id: Option<Uuid>,
    /// 1 is the winner.
    pub placement: i32,
    pub total_players: i32,
    /// Winner only.
    pub solve_time_ms: Option<i64>,
    pub passed_tests: i32,
    pub total_tests: i32,
    /// Language of the player's last submission, if any.
    pub language: Option<String>,
    pub game_mode: GameMode,
    pub difficulty: Difficulty,
    pub rating_change: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RefreshToken {
    pub token_id: Uuid,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl RefreshToken {
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at > now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_stats_start_at_1200_everywhere() {
        let stats = UserStats::new(Uuid::new_v4());
        for difficulty in Difficulty::ALL {
            assert_eq!(stats.bucket(difficulty).rating, 1200);
            assert_eq!(stats.bucket(difficulty).peak_rating, 1200);
        }
    }

    #[test]
    fn refresh_token_validity() {
        let now = Utc::now();
        let token = RefreshToken {
            token_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            expires_at: now + chrono::Duration::days(7),
            created_at: now,
            revoked_at: None,
        };
        assert!(token.is_valid(now));
        assert!(!token.is_valid(now + chrono::Duration::days(8)));

        let revoked = RefreshToken {
            revoked_at: Some(now),
            ..token
        };
        assert!(!revoked.is_valid(now));
    }
}
