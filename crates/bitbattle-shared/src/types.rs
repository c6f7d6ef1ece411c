use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Problem difficulty. Each difficulty carries an independent rating track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub const ALL: [Difficulty; 3] = [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard];

    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Difficulty {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            other => Err(ParseError::Difficulty(other.to_string())),
        }
    }
}

/// Difficulty as requested by a client: a concrete level, or `Any`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DifficultyFilter {
    Easy,
    Medium,
    Hard,
    Any,
}

impl DifficultyFilter {
    /// Whether a problem of the given difficulty satisfies this filter.
    pub fn matches(&self, difficulty: Difficulty) -> bool {
        match self.as_difficulty() {
            Some(d) => d == difficulty,
            None => true,
        }
    }

    /// The concrete difficulty, or `None` for `Any`.
    pub fn as_difficulty(&self) -> Option<Difficulty> {
        match self {
            DifficultyFilter::Easy => Some(Difficulty::Easy),
            DifficultyFilter::Medium => Some(Difficulty::Medium),
            DifficultyFilter::Hard => Some(Difficulty::Hard),
            DifficultyFilter::Any => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self.as_difficulty() {
            Some(d) => d.as_str(),
            None => "any",
        }
    }
}

impl From<Difficulty> for DifficultyFilter {
    fn from(d: Difficulty) -> Self {
        match d {
            Difficulty::Easy => DifficultyFilter::Easy,
            Difficulty::Medium => DifficultyFilter::Medium,
            Difficulty::Hard => DifficultyFilter::Hard,
        }
    }
}

impl FromStr for DifficultyFilter {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "any" | "random" => Ok(DifficultyFilter::Any),
            other => Ok(other.parse::<Difficulty>()?.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameMode {
    Casual,
    Ranked,
}

impl GameMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GameMode::Casual => "casual",
            GameMode::Ranked => "ranked",
        }
    }
}

impl fmt::Display for GameMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GameMode {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "casual" => Ok(GameMode::Casual),
            "ranked" => Ok(GameMode::Ranked),
            other => Err(ParseError::GameMode(other.to_string())),
        }
    }
}

/// Languages the sandbox can compile and run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    JavaScript,
    Python,
    Java,
    C,
    Cpp,
    Rust,
    Go,
}

impl Language {
    pub const ALL: [Language; 7] = [
        Language::JavaScript,
        Language::Python,
        Language::Java,
        Language::C,
        Language::Cpp,
        Language::Rust,
        Language::Go,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::JavaScript => "javascript",
            Language::Python => "python",
            Language::Java => "java",
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::Rust => "rust",
            Language::Go => "go",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "javascript" | "js" => Ok(Language::JavaScript),
            "python" | "python3" => Ok(Language::Python),
            "java" => Ok(Language::Java),
            "c" => Ok(Language::C),
            "cpp" | "c++" => Ok(Language::Cpp),
            "rust" => Ok(Language::Rust),
            "go" => Ok(Language::Go),
            other => Err(ParseError::Language(other.to_string())),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("unknown difficulty '{0}', expected easy, medium, hard or any")]
    Difficulty(String),
    #[error("unknown game mode '{0}', expected casual or ranked")]
    GameMode(String),
    #[error("unsupported language '{0}'")]
    Language(String),
    #[error("invalid room code '{0}', expected WORD-WORD-DDDD")]
    RoomCode(String),
}

// ---------------------------------------------------------------------------
// Room codes
// ---------------------------------------------------------------------------

const CODE_ADJECTIVES: &[&str] = &[
    "SWIFT", "SHARP", "QUICK", "SMART", "BRAVE", "FAST", "COOL", "EPIC",
];
const CODE_NOUNS: &[&str] = &[
    "CODER", "HACKER", "NINJA", "MASTER", "WIZARD", "GENIUS", "HERO", "CHAMP",
];

/// A validated room code of the form `WORD-WORD-DDDD` (uppercase words,
/// four decimal digits).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomCode(String);

impl RoomCode {
    /// Parse a room code, uppercasing the input first. Rejects anything
    /// that does not match `^[A-Z]+-[A-Z]+-\d{4}$`.
    pub fn parse(raw: &str) -> Result<Self, ParseError> {
        let code = raw.trim().to_ascii_uppercase();
        let mut parts = code.split('-');

        let word = |p: Option<&str>| {
            p.is_some_and(|w| !w.is_empty() && w.bytes().all(|b| b.is_ascii_uppercase()))
        };
        let words_ok = word(parts.next()) && word(parts.next());
        let digits_ok = parts
            .next()
            .is_some_and(|d| d.len() == 4 && d.bytes().all(|b| b.is_ascii_digit()));

        if words_ok && digits_ok && parts.next().is_none() {
            Ok(RoomCode(code))
        } else {
            Err(ParseError::RoomCode(raw.to_string()))
        }
    }

    /// Generate a fresh random code, e.g. `SWIFT-CODER-1234`.
    pub fn generate() -> Self {
        let adjective = CODE_ADJECTIVES[fastrand::usize(..CODE_ADJECTIVES.len())];
        let noun = CODE_NOUNS[fastrand::usize(..CODE_NOUNS.len())];
        let digits = fastrand::u16(1000..10000);
        RoomCode(format!("{adjective}-{noun}-{digits}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RoomCode {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        RoomCode::parse(&value)
    }
}

impl From<RoomCode> for String {
    fn from(code: RoomCode) -> Self {
        code.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn difficulty_filter_matches() {
        assert!(DifficultyFilter::Any.matches(Difficulty::Easy));
        assert!(DifficultyFilter::Any.matches(Difficulty::Hard));
        assert!(DifficultyFilter::Medium.matches(Difficulty::Medium));
        assert!(!DifficultyFilter::Easy.matches(Difficulty::Hard));
    }

    #[test]
    fn parse_filters_and_modes() {
        assert_eq!("Any".parse::<DifficultyFilter>(), Ok(DifficultyFilter::Any));
        assert_eq!(
            "HARD".parse::<DifficultyFilter>(),
            Ok(DifficultyFilter::Hard)
        );
        assert_eq!("ranked".parse::<GameMode>(), Ok(GameMode::Ranked));
        assert!("extreme".parse::<Difficulty>().is_err());
        assert!("competitive".parse::<GameMode>().is_err());
    }

    #[test]
    fn language_aliases() {
        assert_eq!("c++".parse::<Language>(), Ok(Language::Cpp));
        assert_eq!("JS".parse::<Language>(), Ok(Language::JavaScript));
        assert!("ruby".parse::<Language>().is_err());
    }

    #[test]
    fn room_code_accepts_generated_format() {
        for _ in 0..50 {
            let code = RoomCode::generate();
            assert!(RoomCode::parse(code.as_str()).is_ok(), "bad code {code}");
        }
    }

    #[test]
    fn room_code_uppercases_input() {
        let code = RoomCode::parse("swift-coder-1234").unwrap();
        assert_eq!(code.as_str(), "SWIFT-CODER-1234");
    }

    #[test]
    fn room_code_rejects_malformed() {
        for raw in [
            "",
            "SWIFT",
            "SWIFT-CODER",
            "SWIFT-CODER-123",
            "SWIFT-CODER-12345",
            "SWIFT-CODER-12AB",
            "SW1FT-CODER-1234",
            "SWIFT-CODER-1234-EXTRA",
            "-CODER-1234",
        ] {
            assert!(RoomCode::parse(raw).is_err(), "accepted {raw:?}");
        }
    }

    #[test]
    fn room_code_serde_round_trip() {
        let code = RoomCode::parse("EPIC-WIZARD-9001").unwrap();
        let json = serde_json::to_string(&code).unwrap();
        assert_eq!(json, "\"EPIC-WIZARD-9001\"");
        let back: RoomCode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, code);
        assert!(serde_json::from_str::<RoomCode>("\"nope\"").is_err());
    }
}
