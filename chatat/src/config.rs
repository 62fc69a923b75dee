//! Configuration for the `ChatAt` sync core.
//!
//! Layered with the following priority (highest first):
//! 1. Values set programmatically by the embedding client
//! 2. TOML config file (`~/.config/chatat/config.toml`)
//! 3. Compiled defaults
//!
//! A missing default config file is not an error (defaults are used). An
//! explicit path that doesn't exist is an error.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),
}

/// Top-level TOML config file structure (all fields optional overrides).
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    connection: ConnectionFileConfig,
    sync: SyncFileConfig,
}

/// `[connection]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConnectionFileConfig {
    endpoint: Option<String>,
    base_delay_ms: Option<u64>,
    max_attempts: Option<u32>,
    channel_capacity: Option<usize>,
}

/// `[sync]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SyncFileConfig {
    match_window_ms: Option<i64>,
    typing_ttl_ms: Option<u64>,
    sweep_interval_ms: Option<u64>,
}

/// Fully resolved sync core configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// WebSocket endpoint of the relay (e.g. `ws://localhost:8000/ws`).
    /// The user id is appended as a path segment on connect.
    pub endpoint: String,
    /// First reconnect delay; attempt `n` waits `base_delay * n`.
    pub base_delay: Duration,
    /// Reconnect attempt ceiling before giving up.
    pub max_attempts: u32,
    /// Capacity of the inbound/outbound frame channels.
    pub channel_capacity: usize,
    /// Window within which a server echo is matched to a pending
    /// optimistic entry. Heuristic: a wider window risks false-positive
    /// matches under rapid duplicate sends.
    pub match_window: chrono::Duration,
    /// How long a typing entry lives without a refreshing signal.
    pub typing_ttl: Duration,
    /// Interval of the typing-expiry sweep tick.
    pub sweep_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://localhost:8000/ws".to_string(),
            base_delay: Duration::from_secs(1),
            max_attempts: 5,
            channel_capacity: 256,
            match_window: chrono::Duration::seconds(5),
            typing_ttl: Duration::from_secs(2),
            sweep_interval: Duration::from_millis(250),
        }
    }
}

impl SyncConfig {
    /// Loads configuration, layering an optional TOML file over defaults.
    ///
    /// With `path = None` the default location is tried and silently
    /// skipped if absent. An explicit path must exist.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if an explicit file cannot be read or any
    /// file fails to parse.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(explicit) => {
                let text =
                    std::fs::read_to_string(explicit).map_err(|source| ConfigError::ReadFile {
                        path: explicit.to_path_buf(),
                        source,
                    })?;
                toml::from_str(&text)?
            }
            None => match Self::default_path() {
                Some(default) if default.exists() => {
                    let text =
                        std::fs::read_to_string(&default).map_err(|source| {
                            ConfigError::ReadFile {
                                path: default.clone(),
                                source,
                            }
                        })?;
                    toml::from_str(&text)?
                }
                _ => ConfigFile::default(),
            },
        };
        Ok(Self::from_file(file))
    }

    /// The default config file location (`~/.config/chatat/config.toml`).
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("chatat").join("config.toml"))
    }

    fn from_file(file: ConfigFile) -> Self {
        let defaults = Self::default();
        Self {
            endpoint: file.connection.endpoint.unwrap_or(defaults.endpoint),
            base_delay: file
                .connection
                .base_delay_ms
                .map_or(defaults.base_delay, Duration::from_millis),
            max_attempts: file.connection.max_attempts.unwrap_or(defaults.max_attempts),
            channel_capacity: file
                .connection
                .channel_capacity
                .unwrap_or(defaults.channel_capacity),
            match_window: file
                .sync
                .match_window_ms
                .map_or(defaults.match_window, chrono::Duration::milliseconds),
            typing_ttl: file
                .sync
                .typing_ttl_ms
                .map_or(defaults.typing_ttl, Duration::from_millis),
            sweep_interval: file
                .sync
                .sweep_interval_ms
                .map_or(defaults.sweep_interval, Duration::from_millis),
        }
    }
}
