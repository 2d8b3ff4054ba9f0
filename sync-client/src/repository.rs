//! Local reads and writes for one (home, entity type) collection.
//!
//! Every mutation stamps sync metadata through the entity mapping, writes
//! the whole collection back and, when a scheduler is attached, requests a
//! debounced sync.

use chrono::Utc;
use std::marker::PhantomData;
use std::sync::Arc;
use sync_core::{DeleteOutcome, LocalCollection, Record, SyncableEntity};
use sync_types::{EntityId, HomeId};
use tracing::debug;

use crate::error::ClientError;
use crate::scheduler::SchedulerHandle;
use crate::store::{EntityStore, StoredCollection};

/// Typed access to one collection of one home.
pub struct LocalRepository<E: SyncableEntity> {
    store: Arc<dyn EntityStore>,
    home_id: HomeId,
    scheduler: Option<SchedulerHandle>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: SyncableEntity> std::fmt::Debug for LocalRepository<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalRepository")
            .field("entity_type", &E::ENTITY_TYPE)
            .field("home_id", &self.home_id)
            .finish()
    }
}

impl<E: SyncableEntity> LocalRepository<E> {
    /// Repository for `home_id`.
    pub fn new(store: Arc<dyn EntityStore>, home_id: HomeId) -> Self {
        Self {
            store,
            home_id,
            scheduler: None,
            _entity: PhantomData,
        }
    }

    /// Request a debounced sync after every mutation.
    pub fn with_scheduler(mut self, scheduler: SchedulerHandle) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Home this repository writes to.
    pub fn home_id(&self) -> &HomeId {
        &self.home_id
    }

    async fn load(&self) -> Result<LocalCollection<E::Fields>, ClientError> {
        let stored = self.store.read(E::ENTITY_TYPE, &self.home_id).await?;
        Ok(stored.into_local::<E::Fields>(&self.home_id).0)
    }

    async fn save(&self, collection: &LocalCollection<E::Fields>) -> Result<(), ClientError> {
        let snapshot = StoredCollection::from_local(collection)?;
        self.store
            .write(E::ENTITY_TYPE, &self.home_id, snapshot)
            .await?;
        if let Some(scheduler) = &self.scheduler {
            scheduler.request_debounced();
        }
        Ok(())
    }

    fn not_found(id: &EntityId) -> ClientError {
        ClientError::NotFound {
            entity_type: E::ENTITY_TYPE,
            id: id.clone(),
        }
    }

    /// Create a record with a generated id.
    pub async fn create(&self, input: E::Create) -> Result<Record<E::Fields>, ClientError> {
        self.create_with_id(E::generate_id(&self.home_id), input)
            .await
    }

    /// Create a record with a caller-chosen id.
    pub async fn create_with_id(
        &self,
        id: EntityId,
        input: E::Create,
    ) -> Result<Record<E::Fields>, ClientError> {
        let mut collection = self.load().await?;
        if collection.contains(&id) {
            return Err(ClientError::AlreadyExists {
                entity_type: E::ENTITY_TYPE,
                id,
            });
        }

        let record = E::apply_create(input, &self.home_id, id, Utc::now());
        E::validate(&record.fields)?;
        collection.upsert(record.clone());
        self.save(&collection).await?;

        debug!(home_id = %self.home_id, entity_type = %E::ENTITY_TYPE, id = %record.id(), "Created");
        Ok(record)
    }

    /// Apply an update to a live record.
    pub async fn update(
        &self,
        id: &EntityId,
        updates: E::Update,
    ) -> Result<Record<E::Fields>, ClientError> {
        let mut collection = self.load().await?;
        let current = collection
            .get(id)
            .filter(|r| !r.meta.is_tombstone())
            .ok_or_else(|| Self::not_found(id))?;

        let record = E::apply_update(current, updates, Utc::now())?;
        E::validate(&record.fields)?;
        collection.upsert(record.clone());
        self.save(&collection).await?;

        debug!(home_id = %self.home_id, entity_type = %E::ENTITY_TYPE, %id, version = record.meta.version, "Updated");
        Ok(record)
    }

    /// Delete a live record.
    ///
    /// A record the server never saw is dropped outright; anything else
    /// becomes a pending tombstone.
    pub async fn delete(&self, id: &EntityId) -> Result<DeleteOutcome, ClientError> {
        let mut collection = self.load().await?;
        let record = collection
            .get_mut(id)
            .filter(|r| !r.meta.is_tombstone())
            .ok_or_else(|| Self::not_found(id))?;

        let outcome = E::apply_delete(record, Utc::now())?;
        if outcome == DeleteOutcome::HardRemove {
            collection.remove(id);
        }
        self.save(&collection).await?;

        debug!(home_id = %self.home_id, entity_type = %E::ENTITY_TYPE, %id, ?outcome, "Deleted");
        Ok(outcome)
    }

    /// A live record.
    pub async fn get(&self, id: &EntityId) -> Result<Record<E::Fields>, ClientError> {
        self.load()
            .await?
            .get(id)
            .filter(|r| !r.meta.is_tombstone())
            .cloned()
            .ok_or_else(|| Self::not_found(id))
    }

    /// All live records.
    pub async fn get_all(&self) -> Result<Vec<Record<E::Fields>>, ClientError> {
        Ok(self.load().await?.live().cloned().collect())
    }

    /// Records with a pending mutation, tombstones included.
    pub async fn get_all_for_sync(&self) -> Result<Vec<Record<E::Fields>>, ClientError> {
        Ok(self.load().await?.pending().cloned().collect())
    }
}
