//! Configuration Module
//!
//! Provides TOML-based configuration for stompd with support for:
//! - Server settings (listen port, framing mode, prefetch default)
//! - Database connection parameters
//! - Environment variable overrides (STOMPD_* prefix)
//!
//! CLI flags override file values; file values override the defaults here.

use std::path::Path;

use config::{Environment, File, FileFormat};
use serde::Deserialize;

#[cfg(test)]
mod tests;

/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// Config crate error
    Config(config::ConfigError),
    /// Validation error
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Config(e) => write!(f, "config error: {}", e),
            ConfigError::Validation(msg) => write!(f, "validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::Config(e)
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub log: LogConfig,
    /// Server configuration
    pub server: ServerConfig,
    /// Database configuration
    pub database: DatabaseConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level: error, warn, info, debug, trace
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// TCP listen port (IPv4 wildcard)
    pub port: u16,
    /// Listen backlog
    pub backlog: u32,
    /// Append a newline after each outgoing frame's NUL terminator
    pub frame_trailing_newline: bool,
    /// Prefetch applied when a subscription does not negotiate one
    pub default_prefetch: usize,
    /// Maximum size of a single inbound frame in bytes
    pub max_frame_size: usize,
    /// CONNECT handshake timeout in seconds
    pub connect_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 44444,
            backlog: 1024,
            frame_trailing_newline: true,
            default_prefetch: 10,
            max_frame_size: 1024 * 1024,
            connect_timeout_secs: 30,
        }
    }
}

/// Database configuration for the durable message store.
///
/// With neither `host` nor `sockdir` set the broker runs on the in-memory
/// store and nothing survives a restart.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Server hostname (TCP)
    pub host: Option<String>,
    /// Server port
    pub port: u16,
    /// Database name
    pub database: String,
    /// Unix socket directory; takes precedence over `host`
    pub sockdir: Option<String>,
    /// Role to connect as
    pub user: Option<String>,
    /// Password for the role
    pub password: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: 5432,
            database: "stompd".to_string(),
            sockdir: None,
            user: None,
            password: None,
        }
    }
}

impl DatabaseConfig {
    /// Whether any connection target was configured.
    pub fn is_configured(&self) -> bool {
        self.host.is_some() || self.sockdir.is_some()
    }
}

impl Config {
    /// Load configuration from a TOML file, with STOMPD_* environment
    /// variables layered on top (e.g. STOMPD_SERVER__PORT=61613).
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let settings = config::Config::builder()
            .add_source(File::from(path).format(FileFormat::Toml))
            .add_source(Environment::with_prefix("STOMPD").separator("__"))
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}
