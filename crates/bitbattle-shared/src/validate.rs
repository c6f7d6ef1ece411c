//! Input validation shared by the HTTP handlers and WebSocket admission.

use thiserror::Error;

pub const USERNAME_MAX_LENGTH: usize = 15;
pub const CODE_MAX_LENGTH: usize = 100_000;
pub const CONNECTION_ID_MAX_LENGTH: usize = 100;
pub const MIN_PLAYERS: usize = 2;
pub const MAX_PLAYERS: usize = 4;

/// Names that would read as system actors in the room feed.
const RESERVED_USERNAMES: &[&str] = &["admin", "system", "bot", "moderator", "mod", "null"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidateError {
    #[error("username is required")]
    UsernameEmpty,
    #[error("username must be at most {USERNAME_MAX_LENGTH} characters")]
    UsernameTooLong,
    #[error("username may only contain letters, digits, underscores and hyphens")]
    UsernameCharset,
    #[error("this username is reserved")]
    UsernameReserved,
    #[error("code cannot be empty")]
    CodeEmpty,
    #[error("code exceeds the maximum length of {CODE_MAX_LENGTH} bytes")]
    CodeTooLong,
    #[error("code contains invalid characters")]
    CodeInvalidBytes,
    #[error("connection id is required")]
    ConnectionIdEmpty,
    #[error("connection id is too long")]
    ConnectionIdTooLong,
    #[error("connection id may only contain letters, digits and underscores")]
    ConnectionIdCharset,
    #[error("player count must be between {MIN_PLAYERS} and {MAX_PLAYERS}")]
    PlayerCount,
}

/// Validate a display name; returns the trimmed form.
pub fn username(raw: &str) -> Result<&str, ValidateError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(ValidateError::UsernameEmpty);
    }
    if name.len() > USERNAME_MAX_LENGTH {
        return Err(ValidateError::UsernameTooLong);
    }
    if !name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '_' || c == '-')
    {
        return Err(ValidateError::UsernameCharset);
    }
    if RESERVED_USERNAMES.contains(&name.to_ascii_lowercase().as_str()) {
        return Err(ValidateError::UsernameReserved);
    }
    Ok(name)
}

/// Validate submitted source code. NUL bytes are rejected outright since no
/// supported toolchain accepts them.
pub fn code(source: &str) -> Result<(), ValidateError> {
    if source.is_empty() {
        return Err(ValidateError::CodeEmpty);
    }
    if source.len() > CODE_MAX_LENGTH {
        return Err(ValidateError::CodeTooLong);
    }
    if source.contains('\0') {
        return Err(ValidateError::CodeInvalidBytes);
    }
    Ok(())
}

/// Validate a matchmaking connection id; returns the trimmed form.
pub fn connection_id(raw: &str) -> Result<&str, ValidateError> {
    let id = raw.trim();
    if id.is_empty() {
        return Err(ValidateError::ConnectionIdEmpty);
    }
    if id.len() > CONNECTION_ID_MAX_LENGTH {
        return Err(ValidateError::ConnectionIdTooLong);
    }
    if !id.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return Err(ValidateError::ConnectionIdCharset);
    }
    Ok(id)
}

pub fn player_count(count: usize) -> Result<usize, ValidateError> {
    if (MIN_PLAYERS..=MAX_PLAYERS).contains(&count) {
        Ok(count)
    } else {
        Err(ValidateError::PlayerCount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usernames() {
        assert_eq!(username("  alice "), Ok("alice"));
        assert_eq!(username("Player_1-x"), Ok("Player_1-x"));
        assert_eq!(username(""), Err(ValidateError::UsernameEmpty));
        assert_eq!(username("Admin"), Err(ValidateError::UsernameReserved));
        assert_eq!(username("a@b"), Err(ValidateError::UsernameCharset));
        assert_eq!(
            username(&"a".repeat(16)),
            Err(ValidateError::UsernameTooLong)
        );
    }

    #[test]
    fn code_limits() {
        assert!(code("print('hi')").is_ok());
        assert_eq!(code(""), Err(ValidateError::CodeEmpty));
        assert_eq!(code("a\0b"), Err(ValidateError::CodeInvalidBytes));
        assert_eq!(
            code(&"x".repeat(CODE_MAX_LENGTH + 1)),
            Err(ValidateError::CodeTooLong)
        );
    }

    #[test]
    fn connection_ids() {
        assert_eq!(connection_id("conn_42"), Ok("conn_42"));
        assert_eq!(connection_id(""), Err(ValidateError::ConnectionIdEmpty));
        assert_eq!(
            connection_id("no-dashes"),
            Err(ValidateError::ConnectionIdCharset)
        );
    }

    #[test]
    fn player_counts() {
        assert!(player_count(2).is_ok());
        assert!(player_count(4).is_ok());
        assert_eq!(player_count(1), Err(ValidateError::PlayerCount));
        assert_eq!(player_count(5), Err(ValidateError::PlayerCount));
    }
}
