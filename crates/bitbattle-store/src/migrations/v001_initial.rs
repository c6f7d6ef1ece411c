use rusqlite::Connection;

/// Initial schema: users, per-user stats with one rating bucket per
/// difficulty, durable game results, and refresh tokens for the auth
/// boundary. New rating buckets start at 1200.
pub fn up(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE users (
            id            TEXT PRIMARY KEY,
            email         TEXT NOT NULL UNIQUE,
            display_name  TEXT NOT NULL,
            avatar_url    TEXT,
            created_at    TEXT NOT NULL
        );

        CREATE TABLE user_stats (
            user_id            TEXT PRIMARY KEY REFERENCES users(id) ON DELETE CASCADE,
            games_played       INTEGER NOT NULL DEFAULT 0,
            games_won          INTEGER NOT NULL DEFAULT 0,
            games_lost         INTEGER NOT NULL DEFAULT 0,
            problems_solved    INTEGER NOT NULL DEFAULT 0,
            fastest_solve_ms   INTEGER,
            current_streak     INTEGER NOT NULL DEFAULT 0,
            longest_streak     INTEGER NOT NULL DEFAULT 0,
            last_played_at     TEXT,
            easy_rating        INTEGER NOT NULL DEFAULT 1200,
            easy_peak_rating   INTEGER NOT NULL DEFAULT 1200,
            easy_ranked_games  INTEGER NOT NULL DEFAULT 0,
            easy_ranked_wins   INTEGER NOT NULL DEFAULT 0,
            medium_rating      INTEGER NOT NULL DEFAULT 1200,
            medium_peak_rating INTEGER NOT NULL DEFAULT 1200,
            medium_ranked_games INTEGER NOT NULL DEFAULT 0,
            medium_ranked_wins INTEGER NOT NULL DEFAULT 0,
            hard_rating        INTEGER NOT NULL DEFAULT 1200,
            hard_peak_rating   INTEGER NOT NULL DEFAULT 1200,
            hard_ranked_games  INTEGER NOT NULL DEFAULT 0,
            hard_ranked_wins   INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE game_results (
            id             TEXT PRIMARY KEY,
            room_id        TEXT NOT NULL,
            problem_id     TEXT NOT NULL,
            user_id        TEXT REFERENCES users(id) ON DELETE SET NULL,
            placement      INTEGER NOT NULL,
            total_players  INTEGER NOT NULL,
            solve_time_ms  INTEGER,
            passed_tests   INTEGER NOT NULL DEFAULT 0,
            total_tests    INTEGER NOT NULL DEFAULT 0,
            language       TEXT,
            game_mode      TEXT NOT NULL,
            difficulty     TEXT NOT NULL,
            rating_change  INTEGER NOT NULL DEFAULT 0,
            created_at     TEXT NOT NULL
        );

        CREATE INDEX idx_game_results_user ON game_results(user_id, created_at DESC);
        CREATE INDEX idx_game_results_room ON game_results(room_id);

        CREATE TABLE refresh_tokens (
            token_id    TEXT PRIMARY KEY,
            user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            expires_at  TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            revoked_at  TEXT
        );

        CREATE INDEX idx_refresh_tokens_user ON refresh_tokens(user_id);
        "#,
    )
}
