//! Local persistence contract.
//!
//! The sync engine only needs to read and write whole collections, one per
//! (home, entity type) partition. Records are opaque JSON values here; the
//! engine decodes them with the entity's mapping.
//!
//! Implementations:
//! - [`MemoryStore`] for tests and embedding
//! - [`JsonFileStore`] for one JSON file per partition on disk

mod file;
mod memory;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use sync_core::{Checkpoint, LocalCollection, MappingError, MergeError};
use sync_types::{EntityType, HomeId};
use thiserror::Error;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem access failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File or directory involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// A stored collection is not valid JSON of the expected shape.
    #[error("corrupt collection file {path}: {source}")]
    Corrupt {
        /// Offending file
        path: PathBuf,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },

    /// A collection could not be serialized.
    #[error("failed to serialize collection: {0}")]
    Serialize(#[source] serde_json::Error),

    /// An id cannot be used as a storage key.
    #[error("invalid storage key: {0:?}")]
    InvalidKey(String),

    /// The store refused the operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Persisted state of one (home, entity type) collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredCollection {
    /// Records, as stored
    #[serde(default)]
    pub records: Vec<Value>,
    /// Server timestamp of the last applied sync
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Pull cursor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_pulled_version: Option<u64>,
}

impl StoredCollection {
    /// Decode into a typed collection for `home_id`.
    ///
    /// Values that cannot be used are kept aside and reported.
    pub fn into_local<F: Serialize + DeserializeOwned>(
        self,
        home_id: &HomeId,
    ) -> (LocalCollection<F>, Vec<MergeError>) {
        let checkpoint = Checkpoint::new(self.last_pulled_version, self.last_sync_time);
        LocalCollection::decode(home_id.clone(), self.records, checkpoint)
    }

    /// Encode a typed collection and its checkpoint.
    pub fn from_local<F: Serialize + DeserializeOwned>(
        collection: &LocalCollection<F>,
    ) -> Result<Self, MappingError> {
        Ok(Self {
            records: collection.encode()?,
            last_sync_time: collection.checkpoint.last_sync_time,
            last_pulled_version: Some(collection.checkpoint.last_pulled_version),
        })
    }
}

/// Durable per-partition collection storage.
///
/// A `write` replaces the whole collection and is atomic: readers see
/// either the old or the new snapshot.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Read a collection. A partition never written reads as empty.
    async fn read(
        &self,
        entity_type: EntityType,
        home_id: &HomeId,
    ) -> Result<StoredCollection, StoreError>;

    /// Replace a collection.
    async fn write(
        &self,
        entity_type: EntityType,
        home_id: &HomeId,
        snapshot: StoredCollection,
    ) -> Result<(), StoreError>;

    /// Whether a collection has ever been written.
    async fn contains(&self, entity_type: EntityType, home_id: &HomeId)
        -> Result<bool, StoreError>;

    /// Homes with a stored `homes` collection.
    async fn home_ids(&self) -> Result<Vec<HomeId>, StoreError>;

    /// Make sure a collection exists, writing an empty one if needed.
    async fn initialize(&self, entity_type: EntityType, home_id: &HomeId) -> Result<(), StoreError> {
        if !self.contains(entity_type, home_id).await? {
            self.write(entity_type, home_id, StoredCollection::default())
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sync_core::TodoFields;

    #[test]
    fn stored_collection_json_shape() {
        let stored = StoredCollection {
            records: vec![json!({"id": "a1"})],
            last_sync_time: None,
            last_pulled_version: Some(3),
        };
        let json = serde_json::to_value(&stored).unwrap();
        assert_eq!(json, json!({"records": [{"id": "a1"}], "lastPulledVersion": 3}));
    }

    #[test]
    fn stored_collection_round_trips_checkpoint() {
        let stored = StoredCollection {
            records: vec![],
            last_sync_time: Some("2024-03-01T09:00:00Z".parse().unwrap()),
            last_pulled_version: Some(12),
        };

        let (local, issues) = stored.clone().into_local::<TodoFields>(&HomeId::new("h1"));
        assert!(issues.is_empty());
        assert_eq!(local.checkpoint.last_pulled_version, 12);

        let back = StoredCollection::from_local(&local).unwrap();
        assert_eq!(back, stored);
    }

    #[test]
    fn missing_fields_read_as_empty() {
        let stored: StoredCollection = serde_json::from_str("{}").unwrap();
        assert_eq!(stored, StoredCollection::default());
    }
}
