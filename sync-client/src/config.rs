//! Configuration loading for sync clients.
//!
//! Configuration is loaded from a TOML file (default: `sync.toml` in the
//! data directory). Every field has a default, so an empty file is valid.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use sync_core::{EntityRegistry, RegistryError};
use sync_types::EntityType;

/// Root configuration for a sync client.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncConfig {
    /// Trigger scheduling.
    #[serde(default)]
    pub sync: ScheduleConfig,
    /// Remote endpoint.
    #[serde(default)]
    pub http: HttpConfig,
}

/// Trigger scheduling configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    /// Quiet period after local edits in milliseconds (default: 2000).
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Periodic sync interval in seconds (default: 300 = 5 minutes).
    #[serde(default = "default_periodic_interval_secs")]
    pub periodic_interval_secs: u64,
    /// Collections to sync; empty means all of them.
    #[serde(default)]
    pub entity_types: Vec<EntityType>,
}

/// Remote endpoint configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Base URL of the sync service (default: http://127.0.0.1:8080).
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Request timeout in seconds (default: 30).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Bearer token sent with every request.
    pub bearer_token: Option<String>,
}

// Default value functions
fn default_debounce_ms() -> u64 {
    2000
}

fn default_periodic_interval_secs() -> u64 {
    300 // 5 minutes
}

fn default_base_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            periodic_interval_secs: default_periodic_interval_secs(),
            entity_types: Vec::new(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            bearer_token: None,
        }
    }
}

impl HttpConfig {
    /// Request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl SyncConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Debounce window.
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.sync.debounce_ms)
    }

    /// Periodic trigger interval.
    pub fn periodic_interval(&self) -> Duration {
        Duration::from_secs(self.sync.periodic_interval_secs)
    }

    /// Set the debounce window.
    pub fn with_debounce(mut self, window: Duration) -> Self {
        self.sync.debounce_ms = window.as_millis() as u64;
        self
    }

    /// Set the periodic interval.
    pub fn with_periodic_interval(mut self, interval: Duration) -> Self {
        self.sync.periodic_interval_secs = interval.as_secs();
        self
    }

    /// Set the remote base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.http.base_url = base_url.into();
        self
    }

    /// Registry of the configured collections, `homes` first.
    pub fn registry(&self) -> Result<EntityRegistry, RegistryError> {
        EntityRegistry::standard_subset(&self.sync.entity_types)
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}
