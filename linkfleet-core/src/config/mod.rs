//! Configuration management for linkfleet
//!
//! Configuration comes from a TOML file or from `LINKFLEET_*` environment
//! variables layered over the defaults. Durations use humantime syntax
//! (`"90s"`, `"2m"`).

use crate::lifecycle::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

mod error;

pub use error::ConfigError;

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// On-disk session state
    pub store: StoreConfig,

    /// Connection lifecycle tuning
    pub lifecycle: LifecycleConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Graceful shutdown
    pub shutdown: ShutdownConfig,
}

/// Where session state lives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Parent directory of the per-account credential directories
    pub sessions_dir: PathBuf,

    /// JSON file listing accounts to resume on startup
    pub active_list_file: PathBuf,
}

/// Lifecycle timing and retry policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Abandon an attempt that has not opened within this window
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Wait after a `connecting` update before checking for stored
    /// credentials and, if absent, requesting a pairing code
    #[serde(with = "humantime_serde")]
    pub pairing_probe_delay: Duration,

    /// Automatic reconnects after a close
    pub reconnect: RetryPolicy,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Enable JSON formatting
    pub json_format: bool,

    /// Include timestamps
    pub with_timestamp: bool,

    /// Include target module
    pub with_target: bool,
}

/// Graceful shutdown configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Grace period granted to components after the shutdown signal
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sessions_dir: PathBuf::from("./data/sessions"),
            active_list_file: PathBuf::from("./data/active_sessions.json"),
        }
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(120),
            pairing_probe_delay: Duration::from_secs(1),
            reconnect: RetryPolicy::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            with_timestamp: true,
            with_target: true,
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
        }
    }
}

fn parse_var<T>(var: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        var,
        reason: e.to_string(),
    })
}

fn parse_duration_var(var: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    humantime_serde::re::humantime::parse_duration(raw.trim()).map_err(|e| {
        ConfigError::InvalidValue {
            var,
            reason: e.to_string(),
        }
    })
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Environment variables follow the pattern: LINKFLEET_<SECTION>_<KEY>
    /// Example: LINKFLEET_STORE_SESSIONS_DIR=/var/lib/linkfleet/sessions
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env(|name| env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from any variable source
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Store config
        if let Some(dir) = lookup("LINKFLEET_STORE_SESSIONS_DIR") {
            self.store.sessions_dir = PathBuf::from(dir);
        }
        if let Some(file) = lookup("LINKFLEET_STORE_ACTIVE_LIST_FILE") {
            self.store.active_list_file = PathBuf::from(file);
        }

        // Lifecycle config
        if let Some(raw) = lookup("LINKFLEET_LIFECYCLE_CONNECT_TIMEOUT") {
            self.lifecycle.connect_timeout =
                parse_duration_var("LINKFLEET_LIFECYCLE_CONNECT_TIMEOUT", &raw)?;
        }
        if let Some(raw) = lookup("LINKFLEET_LIFECYCLE_PAIRING_PROBE_DELAY") {
            self.lifecycle.pairing_probe_delay =
                parse_duration_var("LINKFLEET_LIFECYCLE_PAIRING_PROBE_DELAY", &raw)?;
        }
        if let Some(raw) = lookup("LINKFLEET_LIFECYCLE_MAX_RECONNECTS") {
            self.lifecycle.reconnect.max_attempts =
                parse_var("LINKFLEET_LIFECYCLE_MAX_RECONNECTS", &raw)?;
        }
        if let Some(raw) = lookup("LINKFLEET_LIFECYCLE_RECONNECT_BASE_DELAY") {
            self.lifecycle.reconnect.base_delay =
                parse_duration_var("LINKFLEET_LIFECYCLE_RECONNECT_BASE_DELAY", &raw)?;
        }

        // Logging config
        if let Some(level) = lookup("LINKFLEET_LOG_LEVEL") {
            self.logging.level = level.trim().to_lowercase();
        }
        if let Some(raw) = lookup("LINKFLEET_LOG_JSON") {
            self.logging.json_format = parse_var("LINKFLEET_LOG_JSON", &raw)?;
        }

        // Shutdown config
        if let Some(raw) = lookup("LINKFLEET_SHUTDOWN_TIMEOUT") {
            self.shutdown.timeout = parse_duration_var("LINKFLEET_SHUTDOWN_TIMEOUT", &raw)?;
        }

        Ok(())
    }

    /// Load configuration from file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::FileReadError(e.to_string()))?;

        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.sessions_dir.as_os_str().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "store.sessions_dir must not be empty".to_string(),
            ));
        }
        if self.store.active_list_file.as_os_str().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "store.active_list_file must not be empty".to_string(),
            ));
        }

        if self.lifecycle.connect_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "lifecycle.connect_timeout must be greater than 0".to_string(),
            ));
        }
        if self.lifecycle.pairing_probe_delay >= self.lifecycle.connect_timeout {
            return Err(ConfigError::ValidationFailed(
                "lifecycle.pairing_probe_delay must be shorter than connect_timeout".to_string(),
            ));
        }
        self.lifecycle
            .reconnect
            .validate()
            .map_err(ConfigError::ValidationFailed)?;

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationFailed(format!(
                "Invalid log level: {}",
                self.logging.level
            )));
        }

        Ok(())
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let contents = self.to_toml()?;

        std::fs::write(path, contents).map_err(|e| ConfigError::FileWriteError(e.to_string()))?;

        Ok(())
    }
}
