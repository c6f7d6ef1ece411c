use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::database::Database;
use crate::error::Result;
use crate::models::GameResult;
use crate::users::{parse_timestamp, parse_uuid};

const GAME_RESULT_COLUMNS: &str = "id, room_id, problem_id, user_id, placement, total_players, \
     solve_time_ms, passed_tests, total_tests, language, \
     game_mode, difficulty, rating_change, created_at";

impl Database {
    /// Most recent games for a user, newest first.
    pub fn game_history(&self, user_id: Uuid, limit: u32) -> Result<Vec<GameResult>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {GAME_RESULT_COLUMNS} FROM game_results
             WHERE user_id = ?1
             ORDER BY created_at DESC
             LIMIT ?2"
        ))?;

        let rows = stmt.query_map(params![user_id.to_string(), limit], row_to_game_result)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    /// All rows written for one room's game, winner first.
    pub fn game_results_for_room(&self, room_id: &str) -> Result<Vec<GameResult>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {GAME_RESULT_COLUMNS} FROM game_results
             WHERE room_id = ?1
             ORDER BY placement ASC"
        ))?;

        let rows = stmt.query_map(params![room_id], row_to_game_result)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }
}

pub(crate) fn insert_game_result(conn: &Connection, result: &GameResult) -> Result<()> {
    conn.execute(
        "INSERT INTO game_results
            (id, room_id, problem_id, user_id, placement, total_players,
             solve_time_ms, passed_tests, total_tests, language,
             game_mode, difficulty, rating_change, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            result.id.to_string(),
            result.room_id,
            result.problem_id,
            result.user_id.map(|id| id.to_string()),
            result.placement,
            result.total_players,
            result.solve_time_ms,
            result.passed_tests,
            result.total_tests,
            result.language,
            result.game_mode.as_str(),
            result.difficulty.as_str(),
            result.rating_change,
            result.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn row_to_game_result(row: &rusqlite::Row<'_>) -> rusqlite::Result<GameResult> {
    let id_str: String = row.get(0)?;
    let user_id_str: Option<String> = row.get(3)?;
    let mode_str: String = row.get(10)?;
    let difficulty_str: String = row.get(11)?;
    let created_str: String = row.get(13)?;

    let parse_enum = |column: usize, e: bitbattle_shared::types::ParseError| {
        rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
    };

    Ok(GameResult {
        id: parse_uuid(&id_str, 0)?,
        room_id: row.get(1)?,
        problem_id: row.get(2)?,
        user_id: user_id_str.map(|value| parse_uuid(&value, 3)).transpose()?,
        placement: row.get(4)?,
        total_players: row.get(5)?,
        solve_time_ms: row.get(6)?,
        passed_tests: row.get(7)?,
        total_tests: row.get(8)?,
        language: row.get(9)?,
        game_mode: mode_str.parse().map_err(|e| parse_enum(10, e))?,
        difficulty: difficulty_str.parse().map_err(|e| parse_enum(11, e))?,
        rating_change: row.get(12)?,
        created_at: parse_timestamp(&created_str, 13)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitbattle_shared::{Difficulty, GameMode};
    use chrono::Utc;

    fn sample(room: &str, user_id: Option<Uuid>, placement: i32) -> GameResult {
        GameResult {
            id: Uuid::new_v4(),
            room_id: room.to_string(),
            problem_id: "sum-of-two".to_string(),
            user_id,
            placement,
            total_players: 2,
            solve_time_ms: (placement == 1).then_some(4200),
            passed_tests: 3,
            total_tests: 3,
            language: Some("python".to_string()),
            game_mode: GameMode::Casual,
            difficulty: Difficulty::Easy,
            rating_change: 0,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn insert_and_query_by_room_and_user() {
        let mut db = Database::open_in_memory().unwrap();
        let user = db.create_user("a@example.com", "a", None).unwrap();

        insert_game_result(db.conn(), &sample("SWIFT-CODER-1234", Some(user.id), 1)).unwrap();
        insert_game_result(db.conn(), &sample("SWIFT-CODER-1234", None, 2)).unwrap();

        let by_room = db.game_results_for_room("SWIFT-CODER-1234").unwrap();
        assert_eq!(by_room.len(), 2);
        assert_eq!(by_room[0].placement, 1);
        assert_eq!(by_room[1].user_id, None);

        let history = db.game_history(user.id, 10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].solve_time_ms, Some(4200));
        assert_eq!(history[0].difficulty, Difficulty::Easy);
    }
}
