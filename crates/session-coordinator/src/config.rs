//! Session coordinator configuration.
//!
//! Configuration is loaded from environment variables with sensible
//! defaults; `from_vars` accepts a plain map for tests.

use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default HTTP/WebSocket bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default liveness sweep interval in seconds.
pub const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 30;

/// Default heartbeat staleness threshold for connections in seconds.
pub const DEFAULT_CONNECTION_TIMEOUT_SECONDS: u64 = 30;

/// Default inactivity threshold for sessions in seconds (15 minutes).
pub const DEFAULT_SESSION_TIMEOUT_SECONDS: u64 = 900;

/// Session coordinator configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP/WebSocket bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Interval between liveness sweeps.
    pub sweep_interval: Duration,

    /// Connections whose last heartbeat is older than this are evicted.
    pub connection_timeout: Duration,

    /// Sessions whose last activity is older than this are deleted.
    pub session_timeout: Duration,

    /// Roster policy for leave/disconnect: `false` (default) marks the
    /// participant offline and preserves their record and in-round vote;
    /// `true` removes the roster entry and prunes their vote from the
    /// current round.
    pub remove_participant_on_leave: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("POKER_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let sweep_interval = parse_seconds(
            vars,
            "POKER_SWEEP_INTERVAL_SECONDS",
            DEFAULT_SWEEP_INTERVAL_SECONDS,
        )?;
        let connection_timeout = parse_seconds(
            vars,
            "POKER_CONNECTION_TIMEOUT_SECONDS",
            DEFAULT_CONNECTION_TIMEOUT_SECONDS,
        )?;
        let session_timeout = parse_seconds(
            vars,
            "POKER_SESSION_TIMEOUT_SECONDS",
            DEFAULT_SESSION_TIMEOUT_SECONDS,
        )?;

        let remove_participant_on_leave = match vars.get("POKER_REMOVE_PARTICIPANT_ON_LEAVE") {
            None => false,
            Some(raw) => raw.parse().map_err(|_| {
                ConfigError::InvalidValue(
                    "POKER_REMOVE_PARTICIPANT_ON_LEAVE".to_string(),
                    raw.clone(),
                )
            })?,
        };

        Ok(Config {
            bind_address,
            sweep_interval,
            connection_timeout,
            session_timeout,
            remove_participant_on_leave,
        })
    }
}

fn parse_seconds(
    vars: &HashMap<String, String>,
    key: &str,
    default_seconds: u64,
) -> Result<Duration, ConfigError> {
    match vars.get(key) {
        None => Ok(Duration::from_secs(default_seconds)),
        Some(raw) => raw
            .parse()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::InvalidValue(key.to_string(), raw.clone())),
    }
}
