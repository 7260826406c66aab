//! Configuration management for Sessionkeeper
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.

use crate::error::{Result, SessionError};
use crate::storage::BackendKind;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration structure for Sessionkeeper
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Storage backend selection and sizing
    #[serde(default)]
    pub storage: StorageConfig,
    /// Session lifecycle settings
    #[serde(default)]
    pub session: SessionConfig,
    /// Logging output settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Storage backend configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Backend selector: "memory" or "redis" (alias "networked")
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Maximum sessions held by the memory backend before LRU eviction
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Networked backend settings
    #[serde(default)]
    pub redis: RedisConfig,
}

fn default_backend() -> String {
    "memory".to_string()
}

fn default_max_sessions() -> usize {
    10_000
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            max_sessions: default_max_sessions(),
            redis: RedisConfig::default(),
        }
    }
}

/// Redis backend configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis URL (redis://host:port/db)
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Prefix applied to every key written by the backend
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_key_prefix() -> String {
    "sessionkeeper:".to_string()
}

fn default_connect_timeout() -> u64 {
    5
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            key_prefix: default_key_prefix(),
            connect_timeout_seconds: default_connect_timeout(),
        }
    }
}

/// Session lifecycle configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Sliding expiry window applied on creation, append, and extension
    #[serde(default = "default_ttl")]
    pub default_ttl_seconds: u64,

    /// Interval between background cleanup sweeps (0 disables the sweep)
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_seconds: u64,

    /// Deadline for a single cleanup sweep
    #[serde(default = "default_cleanup_timeout")]
    pub cleanup_timeout_seconds: u64,

    /// Maximum characters kept from a message after sanitizing
    #[serde(default = "default_max_content_chars")]
    pub max_content_chars: usize,
}

fn default_ttl() -> u64 {
    1800
}

fn default_cleanup_interval() -> u64 {
    300
}

fn default_cleanup_timeout() -> u64 {
    30
}

fn default_max_content_chars() -> usize {
    32_000
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_ttl_seconds: default_ttl(),
            cleanup_interval_seconds: default_cleanup_interval(),
            cleanup_timeout_seconds: default_cleanup_timeout(),
            max_content_chars: default_max_content_chars(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter used when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json_format: bool,

    /// Optional file that receives a copy of every log line
    #[serde(default)]
    pub file_path: Option<String>,
}

fn default_log_level() -> String {
    "sessionkeeper=info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration from file with environment overrides
    ///
    /// A missing file is not an error; defaults are used instead.
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(path: &str) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::debug!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| SessionError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| SessionError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(backend) = std::env::var("SESSIONKEEPER_STORAGE_BACKEND") {
            self.storage.backend = backend;
        }

        if let Ok(url) = std::env::var("SESSIONKEEPER_REDIS_URL") {
            self.storage.redis.url = url;
        }

        if let Ok(max_sessions) = std::env::var("SESSIONKEEPER_MAX_SESSIONS") {
            if let Ok(value) = max_sessions.parse() {
                self.storage.max_sessions = value;
            } else {
                tracing::warn!("Invalid SESSIONKEEPER_MAX_SESSIONS: {}", max_sessions);
            }
        }

        if let Ok(ttl) = std::env::var("SESSIONKEEPER_DEFAULT_TTL_SECONDS") {
            if let Ok(value) = ttl.parse() {
                self.session.default_ttl_seconds = value;
            } else {
                tracing::warn!("Invalid SESSIONKEEPER_DEFAULT_TTL_SECONDS: {}", ttl);
            }
        }

        if let Ok(interval) = std::env::var("SESSIONKEEPER_CLEANUP_INTERVAL_SECONDS") {
            if let Ok(value) = interval.parse() {
                self.session.cleanup_interval_seconds = value;
            } else {
                tracing::warn!("Invalid SESSIONKEEPER_CLEANUP_INTERVAL_SECONDS: {}", interval);
            }
        }

        if let Ok(level) = std::env::var("SESSIONKEEPER_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    /// Apply command-line overrides
    pub fn apply_cli_overrides(&mut self, backend: Option<&str>, verbose: bool) {
        if let Some(backend) = backend {
            self.storage.backend = backend.to_string();
        }
        if verbose {
            self.logging.level = "sessionkeeper=debug".to_string();
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `SessionError::UnsupportedBackend` for an unknown backend
    /// selector and `SessionError::Config` for out-of-range values.
    pub fn validate(&self) -> Result<()> {
        let backend: BackendKind = self.storage.backend.parse()?;

        if backend == BackendKind::Memory && self.storage.max_sessions == 0 {
            return Err(SessionError::Config(
                "storage.max_sessions must be greater than 0".to_string(),
            )
            .into());
        }

        if backend == BackendKind::Redis && self.storage.redis.url.is_empty() {
            return Err(
                SessionError::Config("storage.redis.url cannot be empty".to_string()).into(),
            );
        }

        if self.session.default_ttl_seconds == 0 {
            return Err(SessionError::Config(
                "session.default_ttl_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        if self.session.cleanup_timeout_seconds == 0 {
            return Err(SessionError::Config(
                "session.cleanup_timeout_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        if self.session.max_content_chars == 0 {
            return Err(SessionError::Config(
                "session.max_content_chars must be greater than 0".to_string(),
            )
            .into());
        }

        Ok(())
    }
}

/// Runtime options for a `SessionManager`
///
/// Durations here are not limited to whole seconds, which lets embedders
/// and tests run with very short expiry windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerOptions {
    /// Sliding expiry window
    pub default_ttl: Duration,
    /// Interval between cleanup sweeps; zero disables the background task
    pub cleanup_interval: Duration,
    /// Deadline for a single cleanup sweep
    pub cleanup_timeout: Duration,
    /// Maximum characters kept from a message after sanitizing
    pub max_content_chars: usize,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

impl From<&SessionConfig> for ManagerOptions {
    fn from(config: &SessionConfig) -> Self {
        Self {
            default_ttl: Duration::from_secs(config.default_ttl_seconds),
            cleanup_interval: Duration::from_secs(config.cleanup_interval_seconds),
            cleanup_timeout: Duration::from_secs(config.cleanup_timeout_seconds),
            max_content_chars: config.max_content_chars,
        }
    }
}

impl From<&Config> for ManagerOptions {
    fn from(config: &Config) -> Self {
        Self::from(&config.session)
    }
}
