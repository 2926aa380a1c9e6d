//! Configuration management for the server.

use std::env;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// PostgreSQL connection URL
    pub database_url: String,
    /// Secret used by the token verifier adapter.
    pub auth_secret: Option<String>,
    /// How long a tombstoned record is retained before it becomes eligible for
    /// permanent removal from the version store.
    pub tombstone_grace_days: u32,
    /// Capacity of each session's `ReorderBuffer`.
    pub reorder_buffer_size: usize,
    /// How long the `ReorderBuffer` waits for a missing sequence before
    /// declaring a gap and resetting the session.
    pub reorder_buffer_timeout_ms: u64,
    /// Bounded channel size for a session's outbound `DELIVER` queue; a full
    /// channel trips backpressure and drains the session.
    pub session_outbound_buffer: usize,
    /// Interval between `PING` frames sent to a live session.
    pub heartbeat_interval_secs: u64,
    /// Consecutive missed heartbeats before a session is torn down.
    pub heartbeat_miss_limit: u32,
    /// How long a disconnected session's queued state is kept so a
    /// reconnecting device can resume instead of resyncing from scratch.
    pub reconnect_window_secs: u64,
    /// How long an owner can have zero active or reconnect-held sessions
    /// before its bus topic is dropped and must be recreated on next
    /// `subscribe`.
    pub owner_idle_teardown_secs: u64,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let database_url = env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)?;

        let auth_secret = env::var("AUTH_SECRET").ok();

        let tombstone_grace_days = env_parse("TOMBSTONE_GRACE_DAYS", 30)?;
        let reorder_buffer_size = env_parse("REORDER_BUFFER_SIZE", 64)?;
        let reorder_buffer_timeout_ms = env_parse("REORDER_BUFFER_TIMEOUT_MS", 2000)?;
        let session_outbound_buffer = env_parse("SESSION_OUTBOUND_BUFFER", 1024)?;
        let heartbeat_interval_secs = env_parse("HEARTBEAT_INTERVAL_SECS", 15)?;
        let heartbeat_miss_limit = env_parse("HEARTBEAT_MISS_LIMIT", 3)?;
        let reconnect_window_secs = env_parse("RECONNECT_WINDOW_SECS", 60)?;
        let owner_idle_teardown_secs = env_parse("OWNER_IDLE_TEARDOWN_SECS", 1800)?;

        Ok(Self {
            host,
            port,
            database_url,
            auth_secret,
            tombstone_grace_days,
            reorder_buffer_size,
            reorder_buffer_timeout_ms,
            session_outbound_buffer,
            heartbeat_interval_secs,
            heartbeat_miss_limit,
            reconnect_window_secs,
            owner_idle_teardown_secs,
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue(key)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("DATABASE_URL environment variable is required")]
    MissingDatabaseUrl,

    #[error("Invalid PORT value")]
    InvalidPort,

    #[error("Invalid value for {0}")]
    InvalidValue(&'static str),
}
