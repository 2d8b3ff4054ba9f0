//! Configuration management for homestock-sync.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use sync_client::{JsonFileStore, SyncConfig};
use sync_types::DeviceId;

/// File holding the device identity.
pub const DEVICE_FILE: &str = "device.json";

/// Optional sync configuration inside the data directory.
pub const SYNC_CONFIG_FILE: &str = "sync.toml";

/// Persisted state of the `--loopback` server.
pub const LOOPBACK_FILE: &str = "loopback.json";

/// Device configuration stored locally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Unique device identifier.
    pub device_id: DeviceId,
    /// Human-readable device name.
    pub device_name: String,
    /// When the device was initialized.
    pub created_at: DateTime<Utc>,
}

impl DeviceConfig {
    /// Create a new device configuration.
    pub fn new(name: &str) -> Self {
        Self {
            device_id: DeviceId::random(),
            device_name: name.to_string(),
            created_at: Utc::now(),
        }
    }

    /// Load device configuration from a directory.
    pub async fn load(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(DEVICE_FILE);
        let contents = tokio::fs::read_to_string(&path)
            .await
            .context("Device not initialized. Run 'homestock-sync init' first.")?;
        serde_json::from_str(&contents).context("Invalid device configuration")
    }

    /// Save device configuration to a directory.
    pub async fn save(&self, data_dir: &Path) -> Result<()> {
        let path = data_dir.join(DEVICE_FILE);
        let contents = serde_json::to_string_pretty(self)?;
        tokio::fs::write(&path, contents)
            .await
            .context("Failed to save device configuration")?;
        set_file_permissions_0600(&path).await?;
        Ok(())
    }

    /// Check if device is initialized.
    pub async fn exists(data_dir: &Path) -> bool {
        tokio::fs::try_exists(data_dir.join(DEVICE_FILE))
            .await
            .unwrap_or(false)
    }
}

/// Local record store under the data directory.
pub fn open_store(data_dir: &Path) -> Arc<JsonFileStore> {
    Arc::new(JsonFileStore::new(data_dir.join("store")))
}

/// Load sync settings: an explicit file, else `sync.toml` in the data
/// directory if present, else defaults.
pub fn load_sync_config(data_dir: &Path, explicit: Option<&Path>) -> Result<SyncConfig> {
    let path: PathBuf = match explicit {
        Some(path) => path.to_path_buf(),
        None => {
            let default = data_dir.join(SYNC_CONFIG_FILE);
            if !default.exists() {
                return Ok(SyncConfig::default());
            }
            default
        }
    };
    SyncConfig::from_file(&path).context("Failed to load sync configuration")
}

/// Set file permissions to 0600 (owner read/write only) on Unix.
/// No-op on non-Unix platforms.
async fn set_file_permissions_0600(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .await
            .context("Failed to set file permissions")?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}

/// Set directory permissions to 0700 (owner only) on Unix.
/// No-op on non-Unix platforms.
pub async fn set_dir_permissions_0700(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
            .await
            .context("Failed to set directory permissions")?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}
