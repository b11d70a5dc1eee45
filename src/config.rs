use std::{net::SocketAddr, time::Duration};

use clap::Parser;
use thiserror::Error;

const MAX_REMOTE_TIMEOUT_MS: u64 = 30_000;
const MAX_CONCURRENT_FETCHES: usize = 64;

#[derive(Debug, Clone, Parser)]
#[command(name = "sensor_dashboard", about = "Stores sensor readings and serves a dashboard")]
pub struct Config {
    /// Address the HTTP server binds to
    #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:3000")]
    pub listen: SocketAddr,

    /// Postgres connection string for the readings table
    #[arg(long, env = "CONNECTION_STRING", hide_env_values = true)]
    pub connection_string: Option<String>,

    /// Keep readings in memory instead of Postgres
    #[arg(long, env = "MEMORY_STORE")]
    pub memory_store: bool,

    #[arg(long, env = "DB_MAX_CONNECTIONS", default_value_t = 5)]
    pub max_connections: u32,

    /// Base URL of the remote sensor API; readings come from the local store when unset
    #[arg(long, env = "REMOTE_API_URL")]
    pub remote_api: Option<String>,

    #[arg(long, env = "REMOTE_TIMEOUT_MS", default_value_t = 3000)]
    pub remote_timeout_ms: u64,

    /// Upper bound on device fetches in flight while building the "all" dashboard
    #[arg(long, env = "MAX_CONCURRENT_FETCHES", default_value_t = 4)]
    pub max_concurrent_fetches: usize,

    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_filter: String,

    /// Also log to systemd-journald
    #[arg(long, env = "LOG_JOURNALD")]
    pub journald: bool,

    /// Install the tokio-console layer
    #[arg(long, env = "TOKIO_CONSOLE")]
    pub tokio_console: bool,
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("either --connection-string (CONNECTION_STRING) or --memory-store is required")]
    MissingStore,
    #[error("remote timeout must be between 1 and {MAX_REMOTE_TIMEOUT_MS} ms, got {0}")]
    TimeoutOutOfRange(u64),
    #[error("concurrent fetches must be between 1 and {MAX_CONCURRENT_FETCHES}, got {0}")]
    FetchLimitOutOfRange(usize),
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connection_string.is_none() && !self.memory_store {
            return Err(ConfigError::MissingStore);
        }
        if !(1..=MAX_REMOTE_TIMEOUT_MS).contains(&self.remote_timeout_ms) {
            return Err(ConfigError::TimeoutOutOfRange(self.remote_timeout_ms));
        }
        if !(1..=MAX_CONCURRENT_FETCHES).contains(&self.max_concurrent_fetches) {
            return Err(ConfigError::FetchLimitOutOfRange(
                self.max_concurrent_fetches,
            ));
        }
        Ok(())
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }
}
