//! Initialize device identity.

use anyhow::Result;
use std::path::Path;

use crate::config::{set_dir_permissions_0700, DeviceConfig, DEVICE_FILE};

/// Run the init command.
pub async fn run(data_dir: &Path, name: &str) -> Result<()> {
    // Check if already initialized
    if DeviceConfig::exists(data_dir).await {
        anyhow::bail!(
            "Device already initialized. Delete {} to reinitialize.",
            data_dir.join(DEVICE_FILE).display()
        );
    }

    set_dir_permissions_0700(data_dir).await?;
    let config = DeviceConfig::new(name);
    config.save(data_dir).await?;

    println!("Device initialized successfully!");
    println!();
    println!("  Device ID: {}", config.device_id);
    println!("  Name:      {}", config.device_name);
    println!("  Data dir:  {}", data_dir.display());
    println!();
    println!("Next steps:");
    println!("  1. Create a home: homestock-sync home create \"My Home\"");
    println!("  2. Add a todo:    homestock-sync todo add <home-id> \"Buy milk\"");
    println!("  3. Sync:          homestock-sync sync");

    Ok(())
}
