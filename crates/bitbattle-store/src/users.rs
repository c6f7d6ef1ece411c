use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::User;
use crate::stats;

impl Database {
    /// Create a user together with its initial stats row.
    pub fn create_user(
        &mut self,
        email: &str,
        display_name: &str,
        avatar_url: Option<&str>,
    ) -> Result<User> {
        let user = User {
            id: Uuid::new_v4(),
            email: email.to_string(),
            display_name: display_name.to_string(),
            avatar_url: avatar_url.map(str::to_string),
            created_at: Utc::now(),
        };

        let tx = self.conn_mut().transaction()?;
        tx.execute(
            "INSERT INTO users (id, email, display_name, avatar_url, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                user.id.to_string(),
                user.email,
                user.display_name,
                user.avatar_url,
                user.created_at.to_rfc3339(),
            ],
        )?;
        stats::insert_default_stats(&tx, user.id)?;
        tx.commit()?;

        Ok(user)
    }

    pub fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        get_user(self.conn(), id)
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.conn()
            .query_row(
                "SELECT id, email, display_name, avatar_url, created_at
                 FROM users WHERE email = ?1",
                params![email],
                row_to_user,
            )
            .optional()
            .map_err(StoreError::from)
    }

    pub fn update_display_name(&self, user_id: Uuid, display_name: &str) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE users SET display_name = ?1 WHERE id = ?2",
            params![display_name, user_id.to_string()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

pub(crate) fn get_user(conn: &Connection, id: Uuid) -> Result<Option<User>> {
    conn.query_row(
        "SELECT id, email, display_name, avatar_url, created_at
         FROM users WHERE id = ?1",
        params![id.to_string()],
        row_to_user,
    )
    .optional()
    .map_err(StoreError::from)
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let id_str: String = row.get(0)?;
    let created_str: String = row.get(4)?;

    Ok(User {
        id: parse_uuid(&id_str, 0)?,
        email: row.get(1)?,
        display_name: row.get(2)?,
        avatar_url: row.get(3)?,
        created_at: parse_timestamp(&created_str, 4)?,
    })
}

pub(crate) fn parse_uuid(value: &str, column: usize) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub(crate) fn parse_timestamp(value: &str, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                column,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_fetch_user() {
        let mut db = Database::open_in_memory().unwrap();
        let user = db
            .create_user("alice@example.com", "alice", None)
            .unwrap();

        let fetched = db.get_user(user.id).unwrap().expect("user exists");
        assert_eq!(fetched, user);

        let by_email = db.get_user_by_email("alice@example.com").unwrap();
        assert_eq!(by_email.map(|u| u.id), Some(user.id));

        // The stats row comes into existence with the user.
        let stats = db.get_stats(user.id).unwrap().expect("stats exist");
        assert_eq!(stats.games_played, 0);
        assert_eq!(stats.medium.rating, 1200);
    }

    #[test]
    fn duplicate_email_is_rejected() {
        let mut db = Database::open_in_memory().unwrap();
        db.create_user("bob@example.com", "bob", None).unwrap();
        assert!(db.create_user("bob@example.com", "bob2", None).is_err());
    }

    #[test]
    fn rename_user() {
        let mut db = Database::open_in_memory().unwrap();
        let user = db.create_user("c@example.com", "carol", None).unwrap();
        db.update_display_name(user.id, "carol2").unwrap();
        let fetched = db.get_user(user.id).unwrap().unwrap();
        assert_eq!(fetched.display_name, "carol2");

        assert!(matches!(
            db.update_display_name(Uuid::new_v4(), "ghost"),
            Err(StoreError::NotFound)
        ));
    }
}
