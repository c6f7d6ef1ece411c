//! The auth boundary.
//!
//! Sign-in itself lives outside the core; this module only verifies Bearer
//! access tokens, exchanges refresh tokens for new access tokens, and
//! exposes optional-auth extractors. Unauthenticated clients play as guests.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::AppState;
use crate::error::ServerError;

const ACCESS_TOKEN_MINUTES: i64 = 15;
const REFRESH_TOKEN_DAYS: i64 = 7;

/// Claims of a short-lived access token.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: Uuid,
    pub name: String,
    pub exp: i64,
    pub iat: i64,
    pub token_type: String,
}

/// Claims of a long-lived refresh token; `jti` keys the revocation row.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RefreshClaims {
    pub sub: Uuid,
    pub jti: Uuid,
    pub exp: i64,
    pub iat: i64,
    pub token_type: String,
}

/// A verified identity attached to a request or socket.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub display_name: String,
}

/// `verify_access(token) -> {user_id, display_name}`.
pub fn verify_access(token: &str, secret: &str) -> Result<AuthUser, ServerError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| ServerError::Unauthorized(format!("invalid access token: {e}")))?;

    if data.claims.token_type != "access" {
        return Err(ServerError::Unauthorized("not an access token".to_string()));
    }

    Ok(AuthUser {
        user_id: data.claims.sub,
        display_name: data.claims.name,
    })
}

pub fn create_access_token(
    user_id: Uuid,
    display_name: &str,
    secret: &str,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now();
    let claims = Claims {
        sub: user_id,
        name: display_name.to_string(),
        exp: (now + Duration::minutes(ACCESS_TOKEN_MINUTES)).timestamp(),
        iat: now.timestamp(),
        token_type: "access".to_string(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

/// Mint a refresh token. Returns the encoded token, its `jti` and expiry so
/// the caller can persist the revocation row.
pub fn create_refresh_token(
    user_id: Uuid,
    secret: &str,
) -> Result<(String, Uuid, chrono::DateTime<Utc>), jsonwebtoken::errors::Error> {
    let now = Utc::now();
    let jti = Uuid::new_v4();
    let expires_at = now + Duration::days(REFRESH_TOKEN_DAYS);
    let claims = RefreshClaims {
        sub: user_id,
        jti,
        exp: expires_at.timestamp(),
        iat: now.timestamp(),
        token_type: "refresh".to_string(),
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;
    Ok((token, jti, expires_at))
}

pub fn validate_refresh_token(token: &str, secret: &str) -> Result<RefreshClaims, ServerError> {
    let data = decode::<RefreshClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| ServerError::Unauthorized(format!("invalid refresh token: {e}")))?;

    if data.claims.token_type != "refresh" {
        return Err(ServerError::Unauthorized(
            "not a refresh token".to_string(),
        ));
    }
    Ok(data.claims)
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)
            .ok_or_else(|| ServerError::Unauthorized("missing bearer token".to_string()))?;
        verify_access(token, &state.config.jwt_secret)
    }
}

/// Optional auth: absent or invalid tokens yield `None` instead of 401.
#[derive(Debug, Clone)]
pub struct OptionalAuthUser(pub Option<AuthUser>);

impl FromRequestParts<AppState> for OptionalAuthUser {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = bearer_token(parts).and_then(|token| {
            verify_access(token, &state.config.jwt_secret).ok()
        });
        Ok(OptionalAuthUser(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    #[test]
    fn access_token_round_trip() {
        let user_id = Uuid::new_v4();
        let token = create_access_token(user_id, "alice", SECRET).unwrap();
        let user = verify_access(&token, SECRET).unwrap();
        assert_eq!(user.user_id, user_id);
        assert_eq!(user.display_name, "alice");
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = create_access_token(Uuid::new_v4(), "alice", SECRET).unwrap();
        assert!(verify_access(&token, "other-secret").is_err());
    }

    #[test]
    fn refresh_token_cannot_be_used_as_access() {
        let (token, _, _) = create_refresh_token(Uuid::new_v4(), SECRET).unwrap();
        assert!(verify_access(&token, SECRET).is_err());
    }

    #[test]
    fn refresh_round_trip_keeps_jti() {
        let user_id = Uuid::new_v4();
        let (token, jti, _) = create_refresh_token(user_id, SECRET).unwrap();
        let claims = validate_refresh_token(&token, SECRET).unwrap();
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.jti, jti);
    }
}
