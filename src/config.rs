//! Runtime configuration loaded from environment.
//!
//! Every knob has a default except `JWT_SECRET`: the server refuses to start
//! without a signing secret for bearer credentials.

use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_SESSION_TTL_HOURS: u64 = 24;
const DEFAULT_STORE_TIMEOUT_MS: u64 = 500;
const DEFAULT_LIFECYCLE_WORKERS: usize = 16;
const DEFAULT_MEMORY_SWEEP_SECS: u64 = 60;
const DEFAULT_NOTIFICATION_QUEUE_KEY: &str = "notifications:task-assignment";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub jwt_secret: String,
    /// Expiry applied to every presence record.
    pub session_ttl: Duration,
    /// Per-operation bound on presence store calls.
    pub store_timeout: Duration,
    /// Shared presence store and notification queue; in-process when unset.
    pub redis_url: Option<String>,
    pub notification_queue_key: String,
    /// Remote board-access collaborator; in-memory membership table when unset.
    pub board_access_url: Option<String>,
    /// JSON seed for the in-memory membership table.
    pub board_acl_file: Option<PathBuf>,
    pub lifecycle_workers: usize,
    pub memory_sweep: Duration,
}

impl AppConfig {
    /// Load from process environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if `JWT_SECRET` is unset or empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup. `from_env` delegates here.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if `JWT_SECRET` is unset or empty.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());

        let jwt_secret = non_empty("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?;
        let session_ttl_hours = parse_or(&lookup, "SESSION_TTL_HOURS", DEFAULT_SESSION_TTL_HOURS);
        let store_timeout_ms = parse_or(&lookup, "STORE_TIMEOUT_MS", DEFAULT_STORE_TIMEOUT_MS);
        let memory_sweep_secs = parse_or(&lookup, "MEMORY_SWEEP_SECS", DEFAULT_MEMORY_SWEEP_SECS);

        Ok(Self {
            port: parse_or(&lookup, "PORT", DEFAULT_PORT),
            jwt_secret,
            session_ttl: Duration::from_secs(session_ttl_hours.saturating_mul(3600)),
            store_timeout: Duration::from_millis(store_timeout_ms),
            redis_url: non_empty("REDIS_URL"),
            notification_queue_key: non_empty("NOTIFICATION_QUEUE_KEY")
                .unwrap_or_else(|| DEFAULT_NOTIFICATION_QUEUE_KEY.to_owned()),
            board_access_url: non_empty("BOARD_ACCESS_URL"),
            board_acl_file: non_empty("BOARD_ACL_FILE").map(PathBuf::from),
            lifecycle_workers: parse_or(&lookup, "LIFECYCLE_WORKERS", DEFAULT_LIFECYCLE_WORKERS).max(1),
            memory_sweep: Duration::from_secs(memory_sweep_secs.max(1)),
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
