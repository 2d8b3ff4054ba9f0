//! Show local sync status.

use anyhow::Result;
use serde_json::Value;
use std::path::Path;
use sync_client::{EntityStore, StoredCollection};
use sync_types::EntityType;

use crate::config::{open_store, DeviceConfig};

/// Counts for one stored collection.
#[derive(Debug, Default, PartialEq, Eq)]
struct CollectionStatus {
    records: usize,
    pending: usize,
    tombstones: usize,
}

fn flag(record: &Value, key: &str) -> bool {
    record.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn summarize(collection: &StoredCollection) -> CollectionStatus {
    let mut status = CollectionStatus {
        records: collection.records.len(),
        ..CollectionStatus::default()
    };
    for record in &collection.records {
        if flag(record, "pendingCreate") || flag(record, "pendingUpdate") || flag(record, "pendingDelete")
        {
            status.pending += 1;
        }
        if record.get("deletedAt").is_some_and(|v| !v.is_null()) {
            status.tombstones += 1;
        }
    }
    status
}

/// Run the status command.
pub async fn run(data_dir: &Path) -> Result<()> {
    let config = DeviceConfig::load(data_dir).await?;

    println!("Device Status");
    println!("=============");
    println!();
    println!("Device:");
    println!("  ID:      {}", config.device_id);
    println!("  Name:    {}", config.device_name);
    println!("  Created: {}", config.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!();

    let store = open_store(data_dir);
    let home_ids = store.home_ids().await?;
    if home_ids.is_empty() {
        println!("Homes: none");
        return Ok(());
    }

    for home_id in home_ids {
        println!("Home {home_id}:");
        for entity_type in EntityType::ALL {
            if !store.contains(entity_type, &home_id).await? {
                continue;
            }
            let collection = store.read(entity_type, &home_id).await?;
            let status = summarize(&collection);
            let last_sync = collection
                .last_sync_time
                .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                .unwrap_or_else(|| "never".to_string());
            println!(
                "  {:<16} {:>4} records  {:>3} pending  {:>3} deleted  cursor {:<5} last sync {}",
                entity_type.as_str(),
                status.records,
                status.pending,
                status.tombstones,
                collection.last_pulled_version.unwrap_or(0),
                last_sync,
            );
        }
        println!();
    }

    Ok(())
}
