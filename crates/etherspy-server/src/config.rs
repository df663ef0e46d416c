//! Process configuration, read once from the environment at startup.
//!
//! Runtime settings (frequency, broker, ...) live in the settings store and
//! are not part of this.

use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

use etherspy_core::{Configuration, DEFAULT_ENGINE};

pub const DB_PATH: &str = "DB_PATH";
pub const ENGINE: &str = "ETHERSPY_ENGINE";
pub const HTTP_ADDR: &str = "ETHERSPY_HTTP_ADDR";
pub const WS_ADDR: &str = "ETHERSPY_WS_ADDR";
pub const DASHBOARD_DIR: &str = "ETHERSPY_DASHBOARD_DIR";
pub const QUIET: &str = "ETHERSPY_QUIET";

/// Invalid process configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ServiceConfigError {
    #[error("{var} is not a socket address: {value:?}")]
    InvalidAddress { var: &'static str, value: String },
}

/// Settings that are fixed for the life of the process.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub db_path: PathBuf,
    /// Decoding engine executable.
    pub engine: String,
    pub http_addr: SocketAddr,
    /// Live WebSocket listener.
    pub ws_addr: SocketAddr,
    pub dashboard_dir: PathBuf,
    /// Diagnostic substrings demoted to `debug`.
    pub quiet_patterns: Vec<String>,
    /// Defaults written to the settings store on first start.
    pub default_settings: Configuration,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ServiceConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable lookup. Unset and empty variables
    /// take their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ServiceConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let addr = |name: &'static str, default: &str| {
            let value = var(name).unwrap_or_else(|| default.to_string());
            value
                .trim()
                .parse::<SocketAddr>()
                .map_err(|_| ServiceConfigError::InvalidAddress { var: name, value })
        };

        let quiet_patterns = match var(QUIET) {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect(),
            None => vec!["Tuned to".to_string(), "Allocating".to_string()],
        };

        Ok(Self {
            db_path: var(DB_PATH).unwrap_or_else(|| "data/etherspy.db".to_string()).into(),
            engine: var(ENGINE).unwrap_or_else(|| DEFAULT_ENGINE.to_string()),
            http_addr: addr(HTTP_ADDR, "0.0.0.0:5000")?,
            ws_addr: addr(WS_ADDR, "0.0.0.0:5001")?,
            dashboard_dir: var(DASHBOARD_DIR).unwrap_or_else(|| "dashboard".to_string()).into(),
            quiet_patterns,
            default_settings: Configuration::defaults_with(|name| var(name)),
        })
    }
}
