use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::RefreshToken;
use crate::users::{parse_timestamp, parse_uuid};

impl Database {
    pub fn create_refresh_token(
        &self,
        user_id: Uuid,
        token_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<RefreshToken> {
        let token = RefreshToken {
            token_id,
            user_id,
            expires_at,
            created_at: Utc::now(),
            revoked_at: None,
        };
        self.conn().execute(
            "INSERT INTO refresh_tokens (token_id, user_id, expires_at, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                token.token_id.to_string(),
                token.user_id.to_string(),
                token.expires_at.to_rfc3339(),
                token.created_at.to_rfc3339(),
            ],
        )?;
        Ok(token)
    }

    pub fn get_refresh_token(&self, token_id: Uuid) -> Result<Option<RefreshToken>> {
        self.conn()
            .query_row(
                "SELECT token_id, user_id, expires_at, created_at, revoked_at
                 FROM refresh_tokens WHERE token_id = ?1",
                params![token_id.to_string()],
                row_to_refresh_token,
            )
            .optional()
            .map_err(StoreError::from)
    }

    /// Mark a token revoked. Returns whether a live token was affected.
    pub fn revoke_refresh_token(&self, token_id: Uuid) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE refresh_tokens SET revoked_at = ?2
             WHERE token_id = ?1 AND revoked_at IS NULL",
            params![token_id.to_string(), Utc::now().to_rfc3339()],
        )?;
        Ok(affected > 0)
    }

    /// Log the user out everywhere.
    pub fn revoke_all_refresh_tokens(&self, user_id: Uuid) -> Result<usize> {
        let affected = self.conn().execute(
            "UPDATE refresh_tokens SET revoked_at = ?2
             WHERE user_id = ?1 AND revoked_at IS NULL",
            params![user_id.to_string(), Utc::now().to_rfc3339()],
        )?;
        Ok(affected)
    }

    /// Drop tokens that expired before `now`. Returns how many were removed.
    pub fn prune_expired_refresh_tokens(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut stmt = self
            .conn()
            .prepare("SELECT token_id, expires_at FROM refresh_tokens")?;
        let rows = stmt.query_map([], |row| {
            let id: String = row.get(0)?;
            let expires: String = row.get(1)?;
            Ok((id, expires))
        })?;

        let mut expired = Vec::new();
        for row in rows {
            let (id, expires) = row?;
            if parse_timestamp(&expires, 1)? <= now {
                expired.push(id);
            }
        }
        drop(stmt);

        for id in &expired {
            self.conn()
                .execute("DELETE FROM refresh_tokens WHERE token_id = ?1", params![id])?;
        }
        Ok(expired.len())
    }
}

fn row_to_refresh_token(row: &rusqlite::Row<'_>) -> rusqlite::Result<RefreshToken> {
    let token_id_str: String = row.get(0)?;
    let user_id_str: String = row.get(1)?;
    let expires_str: String = row.get(2)?;
    let created_str: String = row.get(3)?;
    let revoked_str: Option<String> = row.get(4)?;

    Ok(RefreshToken {
        token_id: parse_uuid(&token_id_str, 0)?,
        user_id: parse_uuid(&user_id_str, 1)?,
        expires_at: parse_timestamp(&expires_str, 2)?,
        created_at: parse_timestamp(&created_str, 3)?,
        revoked_at: revoked_str
            .map(|value| parse_timestamp(&value, 4))
            .transpose()?,
    })
}
