use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use bitbattle_shared::types::ParseError;
use bitbattle_shared::validate::ValidateError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Validation(#[from] ValidateError),

    #[error("{0}")]
    Parse(#[from] ParseError),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Room is not in a playing state")]
    RoomNotPlaying,

    #[error("Store error: {0}")]
    Store(#[from] bitbattle_store::StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    fn status(&self) -> StatusCode {
        match self {
            ServerError::BadRequest(_) | ServerError::Validation(_) | ServerError::Parse(_) => {
                StatusCode::BAD_REQUEST
            }
            ServerError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::RoomNotPlaying => StatusCode::CONFLICT,
            ServerError::Store(_) | ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ServerError::BadRequest(_) => "BAD_REQUEST",
            ServerError::Validation(_) => "VALIDATION_ERROR",
            ServerError::Parse(_) => "INVALID_INPUT",
            ServerError::Unauthorized(_) => "UNAUTHORIZED",
            ServerError::NotFound(_) => "NOT_FOUND",
            ServerError::RoomNotPlaying => "ROOM_NOT_PLAYING",
            ServerError::Store(_) => "STORAGE_ERROR",
            ServerError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Internals are logged in full but never leak to the client.
        let message = match &self {
            ServerError::Store(e) => {
                tracing::error!(error = %e, "store failure in request handler");
                "A storage error occurred".to_string()
            }
            ServerError::Internal(e) => {
                tracing::error!(error = %e, "internal error in request handler");
                "An internal error occurred".to_string()
            }
            other => other.to_string(),
        };

        let body = serde_json::json!({
            "error": message,
            "code": self.code(),
        });

        (status, axum::Json(body)).into_response()
    }
}

pub type ServerResult<T> = Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(
            ServerError::BadRequest("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServerError::NotFound("problem").status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(ServerError::RoomNotPlaying.status(), StatusCode::CONFLICT);
        assert_eq!(
            ServerError::Unauthorized("no token".into()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(ServerError::RoomNotPlaying.code(), "ROOM_NOT_PLAYING");
    }
}
