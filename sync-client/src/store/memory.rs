//! In-memory store for tests and embedding.

use super::{EntityStore, StoreError, StoredCollection};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use sync_types::{EntityType, HomeId};

/// In-memory [`EntityStore`].
///
/// Clones share the same underlying collections.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryStoreInner>>,
}

#[derive(Debug, Default)]
struct MemoryStoreInner {
    collections: HashMap<(HomeId, EntityType), StoredCollection>,
    writes: usize,
    fail_next_write: Option<String>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryStoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cause the next write to fail with the given error.
    pub fn fail_next_write(&self, error: &str) {
        self.lock().fail_next_write = Some(error.to_string());
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> usize {
        self.lock().writes
    }

    /// Snapshot of one collection, if it exists.
    pub fn snapshot(&self, entity_type: EntityType, home_id: &HomeId) -> Option<StoredCollection> {
        self.lock()
            .collections
            .get(&(home_id.clone(), entity_type))
            .cloned()
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn read(
        &self,
        entity_type: EntityType,
        home_id: &HomeId,
    ) -> Result<StoredCollection, StoreError> {
        Ok(self.snapshot(entity_type, home_id).unwrap_or_default())
    }

    async fn write(
        &self,
        entity_type: EntityType,
        home_id: &HomeId,
        snapshot: StoredCollection,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if let Some(error) = inner.fail_next_write.take() {
            return Err(StoreError::Unavailable(error));
        }
        inner
            .collections
            .insert((home_id.clone(), entity_type), snapshot);
        inner.writes += 1;
        Ok(())
    }

    async fn contains(
        &self,
        entity_type: EntityType,
        home_id: &HomeId,
    ) -> Result<bool, StoreError> {
        Ok(self
            .lock()
            .collections
            .contains_key(&(home_id.clone(), entity_type)))
    }

    async fn home_ids(&self) -> Result<Vec<HomeId>, StoreError> {
        let homes: BTreeSet<_> = self
            .lock()
            .collections
            .keys()
            .filter(|(_, entity_type)| *entity_type == EntityType::Homes)
            .map(|(home_id, _)| home_id.clone())
            .collect();
        Ok(homes.into_iter().collect())
    }
}
