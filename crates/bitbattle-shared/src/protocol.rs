//! The WebSocket wire protocol.
//!
//! Every frame is a JSON object `{"type": <kind>, "data": <payload>}`,
//! modelled as adjacently tagged enums so the wire shape is fixed in one
//! place.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::problem::PublicProblem;
use crate::types::{Difficulty, GameMode};

/// Frames the server sends to participants and spectators.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    UserJoined {
        username: String,
        timestamp: i64,
    },
    UserLeft {
        username: String,
    },
    CodeChange {
        username: String,
        code: String,
        timestamp: i64,
    },
    PlayerCount {
        current: usize,
        required: usize,
    },
    ProblemAssigned {
        problem: PublicProblem,
    },
    GameStart {},
    SubmissionResult {
        result: SubmissionResult,
    },
    GameOver(GameOver),
    RoomFull {
        message: String,
    },
    SpectateInit(SpectateInit),
    Error {
        message: String,
        code: String,
    },
}

impl ServerEvent {
    /// Frames that must never be dropped by backpressure handling. A socket
    /// too slow to take one of these is force-closed instead.
    pub fn is_critical(&self) -> bool {
        !matches!(self, ServerEvent::CodeChange { .. })
    }

    pub fn to_json(&self) -> String {
        // The enum contains only plain data types; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Frames clients may send to the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    UserJoined {
        username: String,
    },
    CodeChange {
        username: String,
        code: String,
        timestamp: i64,
    },
    UserLeft {
        username: String,
    },
}

/// Payload of the `game_over` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameOver {
    /// `None` when the game was abandoned before anyone won.
    pub winner: Option<String>,
    pub solve_time_ms: Option<u64>,
    pub problem_id: Option<String>,
    pub difficulty: Option<Difficulty>,
    pub game_mode: GameMode,
    pub players: Vec<String>,
    pub rating_changes: HashMap<String, RatingChange>,
}

/// Snapshot sent to a spectator right after it connects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpectateInit {
    pub room_id: String,
    pub players: Vec<String>,
    pub game_mode: GameMode,
    pub game_started: bool,
    pub game_ended: bool,
    pub winner: Option<String>,
    pub problem: Option<PublicProblem>,
    pub player_codes: HashMap<String, String>,
    pub spectator_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingChange {
    pub old_rating: i32,
    pub new_rating: i32,
    pub change: i32,
}

impl RatingChange {
    pub fn unchanged(rating: i32) -> Self {
        Self {
            old_rating: rating,
            new_rating: rating,
            change: 0,
        }
    }
}

/// Result of judging one submission against every hidden test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionResult {
    pub passed: bool,
    pub passed_tests: usize,
    pub total_tests: usize,
    pub test_results: Vec<TestResult>,
    /// Sum of the per-test durations.
    pub execution_time_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub input: String,
    pub expected: String,
    pub actual: String,
    pub passed: bool,
    pub time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Handed to each side of a freshly produced match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchInfo {
    pub room_code: String,
    pub opponent: String,
    pub difficulty: String,
    pub game_mode: GameMode,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_event_wire_shape() {
        let event = ServerEvent::PlayerCount {
            current: 1,
            required: 2,
        };
        let value: serde_json::Value = serde_json::from_str(&event.to_json()).unwrap();
        assert_eq!(value["type"], "player_count");
        assert_eq!(value["data"]["current"], 1);
        assert_eq!(value["data"]["required"], 2);
    }

    #[test]
    fn game_start_carries_empty_data() {
        let value: serde_json::Value =
            serde_json::from_str(&ServerEvent::GameStart {}.to_json()).unwrap();
        assert_eq!(value["type"], "game_start");
        assert_eq!(value["data"], serde_json::json!({}));
    }

    #[test]
    fn client_event_round_trip() {
        let raw = r#"{"type":"code_change","data":{"username":"alice","code":"print(1)","timestamp":1700000000000}}"#;
        let event: ClientEvent = serde_json::from_str(raw).unwrap();
        match event {
            ClientEvent::CodeChange { username, code, .. } => {
                assert_eq!(username, "alice");
                assert_eq!(code, "print(1)");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let raw = r#"{"type":"teleport","data":{}}"#;
        assert!(serde_json::from_str::<ClientEvent>(raw).is_err());
    }

    #[test]
    fn code_change_is_droppable_everything_else_critical() {
        let droppable = ServerEvent::CodeChange {
            username: "a".into(),
            code: String::new(),
            timestamp: 0,
        };
        assert!(!droppable.is_critical());
        assert!(ServerEvent::GameStart {}.is_critical());
        assert!(ServerEvent::UserLeft { username: "a".into() }.is_critical());
    }

    #[test]
    fn game_over_serializes_null_winner() {
        let over = GameOver {
            winner: None,
            solve_time_ms: None,
            problem_id: None,
            difficulty: None,
            game_mode: GameMode::Casual,
            players: vec!["alice".into()],
            rating_changes: HashMap::new(),
        };
        let value = serde_json::to_value(ServerEvent::GameOver(over)).unwrap();
        assert_eq!(value["type"], "game_over");
        assert!(value["data"]["winner"].is_null());
    }
}
