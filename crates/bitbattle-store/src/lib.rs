//! SQLite persistence for the battle server: users, per-difficulty stats,
//! durable game results, refresh tokens, and the transactional recording of
//! finished games.

pub mod database;
pub mod elo;
mod error;
mod game_results;
mod games;
mod migrations;
pub mod models;
mod refresh_tokens;
mod stats;
mod users;

pub use database::Database;
pub use error::{Result, StoreError};
pub use games::{GameOutcome, ParticipantOutcome};
pub use models::{GameResult, RatingBucket, RefreshToken, User, UserStats};
