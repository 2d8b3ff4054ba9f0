//! Create, join and list homes.

use anyhow::{Context, Result};
use std::path::Path;
use sync_client::{EntityStore, LocalRepository};
use sync_core::{HomeEntity, HomeFields};
use sync_types::{EntityId, EntityType, HomeId};

use crate::config::{open_store, DeviceConfig};

/// Create a home locally. It reaches the server on the next sync.
pub async fn create(data_dir: &Path, name: &str) -> Result<HomeId> {
    DeviceConfig::load(data_dir).await?;

    let store = open_store(data_dir);
    let home_id = HomeId::from_entity(&EntityId::generate());
    let repository = LocalRepository::<HomeEntity>::new(store, home_id.clone());
    repository
        .create(HomeFields {
            name: name.to_string(),
            address: None,
        })
        .await
        .context("Failed to create home")?;

    println!("Home created!");
    println!();
    println!("  Home ID: {home_id}");
    println!("  Name:    {name}");
    println!();
    println!("Share the home ID with other members so they can join.");

    Ok(home_id)
}

/// Register an existing home so the next sync pulls its records.
pub async fn join(data_dir: &Path, home_id: &str) -> Result<()> {
    DeviceConfig::load(data_dir).await?;

    let home_id = HomeId::new(home_id);
    let store = open_store(data_dir);
    if store.contains(EntityType::Homes, &home_id).await? {
        anyhow::bail!("Home {home_id} is already on this device");
    }
    store
        .initialize(EntityType::Homes, &home_id)
        .await
        .context("Failed to register home")?;

    println!("Joined home {home_id}. Run 'homestock-sync sync' to download it.");
    Ok(())
}

/// Print every home on this device.
pub async fn list(data_dir: &Path) -> Result<()> {
    let store = open_store(data_dir);
    let home_ids = store.home_ids().await?;
    if home_ids.is_empty() {
        println!("No homes yet. Create one with 'homestock-sync home create <name>'.");
        return Ok(());
    }

    for home_id in home_ids {
        let repository = LocalRepository::<HomeEntity>::new(store.clone(), home_id.clone());
        match repository.get(&home_id.as_entity()).await {
            Ok(home) => println!("{home_id}  {}", home.fields.name),
            Err(_) => println!("{home_id}  (not synced yet)"),
        }
    }
    Ok(())
}

/// Fail with a readable message if `home_id` is not on this device.
pub async fn require(store: &dyn EntityStore, home_id: &HomeId) -> Result<()> {
    if !store.contains(EntityType::Homes, home_id).await? {
        anyhow::bail!("Unknown home {home_id}. Run 'homestock-sync home list' to see homes.");
    }
    Ok(())
}
