use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use bitbattle_sandbox::SandboxRunner;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("required environment variable {0} is not set")]
    Missing(&'static str),
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// Origin allowed by CORS.
    pub frontend_origin: String,
    pub sandbox_image: String,
    pub sandbox_concurrency: usize,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    /// Inbound `code_change` budget per socket, messages per second.
    pub code_change_rate: f64,
    pub countdown: Duration,
    /// How long an `Ended` room lingers before the registry releases it.
    pub room_grace: Duration,
    pub matcher_tick: Duration,
    /// Per-socket outbound queue depth.
    pub outbound_queue_capacity: usize,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let jwt_secret = std::env::var("JWT_SECRET").map_err(|_| ConfigError::Missing("JWT_SECRET"))?;

        Ok(Self {
            port: parse_var("SERVER_PORT", 4000),
            frontend_origin: std::env::var("FRONTEND_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            sandbox_image: std::env::var("SANDBOX_IMAGE")
                .unwrap_or_else(|_| "bitbattle-sandbox:latest".to_string()),
            sandbox_concurrency: parse_var(
                "SANDBOX_CONCURRENCY",
                SandboxRunner::default_concurrency(),
            ),
            db_path: std::env::var("DB_URL")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./bitbattle.db")),
            jwt_secret,
            code_change_rate: parse_var("CODE_CHANGE_RATE", 20.0),
            countdown: Duration::from_secs(parse_var("COUNTDOWN_SECS", 3)),
            room_grace: Duration::from_secs(parse_var("ROOM_GRACE_SECS", 30)),
            matcher_tick: Duration::from_secs(parse_var("MATCHMAKER_TICK_SECS", 2)),
            outbound_queue_capacity: parse_var("OUTBOUND_QUEUE_CAPACITY", 64),
        })
    }
}

fn parse_var<T: std::str::FromStr + Copy>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(var = name, value = %raw, "unparsable value, using default");
                default
            }
        },
        Err(_) => default,
    }
}
