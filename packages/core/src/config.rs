//! Pool sizing and timing configuration.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable overriding `max_workers`.
pub const ENV_MAX_WORKERS: &str = "WORKPOOL_MAX_WORKERS";
/// Environment variable overriding `poll_interval_ms`.
pub const ENV_POLL_INTERVAL_MS: &str = "WORKPOOL_POLL_INTERVAL_MS";
/// Environment variable overriding `max_shutdown_wait_ms`.
pub const ENV_MAX_SHUTDOWN_WAIT_MS: &str = "WORKPOOL_MAX_SHUTDOWN_WAIT_MS";

/// Configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max_workers must be greater than zero")]
    ZeroWorkers,

    #[error("invalid value for {var}: '{value}'")]
    Env { var: &'static str, value: String },
}

/// Configuration for the worker pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Number of worker units provisioned on start.
    pub max_workers: usize,
    /// Delay between dispatcher iterations (milliseconds).
    pub poll_interval_ms: u64,
    /// Upper bound on how long stop waits for in-flight jobs (milliseconds).
    pub max_shutdown_wait_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_workers: 1,
            poll_interval_ms: 5_000,
            max_shutdown_wait_ms: 10_000,
        }
    }
}

impl Config {
    /// Load configuration from `WORKPOOL_*` environment variables over defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(v) = read_env(ENV_MAX_WORKERS)? {
            config.max_workers = v;
        }
        if let Some(v) = read_env(ENV_POLL_INTERVAL_MS)? {
            config.poll_interval_ms = v;
        }
        if let Some(v) = read_env(ENV_MAX_SHUTDOWN_WAIT_MS)? {
            config.max_shutdown_wait_ms = v;
        }
        config.validate()?;
        Ok(config)
    }

    /// Check that the values are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        Ok(())
    }

    /// Set the number of workers.
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    /// Set the poll interval in milliseconds.
    pub fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Set the shutdown wait in milliseconds.
    pub fn with_max_shutdown_wait_ms(mut self, ms: u64) -> Self {
        self.max_shutdown_wait_ms = ms;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_shutdown_wait(&self) -> Duration {
        Duration::from_millis(self.max_shutdown_wait_ms)
    }
}

fn read_env<T: FromStr>(var: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(var) {
        Ok(value) => parse_env(var, value).map(Some),
        Err(_) => Ok(None),
    }
}

fn parse_env<T: FromStr>(var: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Env { var, value })
}
