//! Shared vocabulary of the BitBattle battle server: difficulties, game
//! modes, languages, room codes, problems and the WebSocket wire protocol.

pub mod problem;
pub mod protocol;
pub mod types;
pub mod validate;

pub use problem::{Problem, PublicProblem, TestCase};
pub use protocol::{
    ClientEvent, GameOver, MatchInfo, RatingChange, ServerEvent, SpectateInit, SubmissionResult,
    TestResult,
};
pub use types::{Difficulty, DifficultyFilter, GameMode, Language, RoomCode};
