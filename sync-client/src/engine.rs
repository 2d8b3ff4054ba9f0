//! Per-collection sync engine.
//!
//! A [`SyncEngine`] runs one round trip for one (home, entity type) pair:
//!
//! 1. read the collection and collect pending records
//! 2. send one batch: a pull section always, a push section if anything
//!    is pending
//! 3. re-read the collection, since local edits may have landed while the
//!    request was in flight
//! 4. fold push outcomes, then pulled changes, into the fresh copy
//! 5. advance the checkpoint and write the collection back
//!
//! Per-record problems are logged and skipped. Transport failures and
//! rejected batches fail the pair without touching storage.

use async_trait::async_trait;
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;
use sync_core::{
    apply_pull, apply_push_outcomes, build_push, CategoryEntity, DeltaAccumulator,
    EntityDescriptor, HomeEntity, InventoryItemEntity, LocalCollection, LocationEntity,
    MappingError, MergeError, Record, SettingsEntity, SyncDelta, SyncableEntity,
    TodoCategoryEntity, TodoEntity,
};
use sync_types::{BatchSyncRequest, DeviceId, EntityType, HomeId, PullRequest, PushRequest};
use tracing::{debug, warn};

use crate::error::ClientError;
use crate::store::{EntityStore, StoredCollection};
use crate::transport::RemoteSyncTransport;

/// Sync engine for one entity type.
pub struct SyncEngine<E: SyncableEntity> {
    store: Arc<dyn EntityStore>,
    descriptor: EntityDescriptor,
    _entity: PhantomData<fn() -> E>,
}

impl<E: SyncableEntity> std::fmt::Debug for SyncEngine<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("entity_type", &E::ENTITY_TYPE)
            .finish()
    }
}

impl<E: SyncableEntity> SyncEngine<E> {
    /// Engine using the default descriptor for `E`.
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self::with_descriptor(store, EntityDescriptor::of::<E>())
    }

    /// Engine using a registry descriptor.
    pub fn with_descriptor(store: Arc<dyn EntityStore>, descriptor: EntityDescriptor) -> Self {
        debug_assert_eq!(descriptor.entity_type, E::ENTITY_TYPE);
        Self {
            store,
            descriptor,
            _entity: PhantomData,
        }
    }

    async fn load(&self, home_id: &HomeId) -> Result<LocalCollection<E::Fields>, ClientError> {
        let stored = self.store.read(E::ENTITY_TYPE, home_id).await?;
        let (collection, issues) = stored.into_local::<E::Fields>(home_id);
        log_issues(E::ENTITY_TYPE, home_id, "stored record set aside", &issues);
        Ok(collection)
    }

    async fn save(&self, collection: &LocalCollection<E::Fields>) -> Result<(), ClientError> {
        let snapshot = StoredCollection::from_local(collection)?;
        self.store
            .write(E::ENTITY_TYPE, collection.home_id(), snapshot)
            .await?;
        Ok(())
    }

    /// Run one push-then-pull round trip for `home_id`.
    pub async fn sync(
        &self,
        home_id: &HomeId,
        transport: &dyn RemoteSyncTransport,
        device_id: &DeviceId,
    ) -> Result<SyncDelta<Record<E::Fields>>, ClientError> {
        let entity_type = E::ENTITY_TYPE;
        let collection = self.load(home_id).await?;

        let batch = build_push::<E>(&collection, self.descriptor.validate);
        log_issues(entity_type, home_id, "pending record not pushed", &batch.skipped);

        let checkpoint = collection.checkpoint;
        let push_requests = (!batch.is_empty()).then(|| {
            vec![PushRequest {
                entity_type,
                entities: batch.envelopes.clone(),
                last_pulled_at: checkpoint.last_sync_time,
                checkpoint: checkpoint.pull_checkpoint(),
            }]
        });
        let request = BatchSyncRequest {
            home_id: home_id.clone(),
            device_id: device_id.clone(),
            pull_requests: vec![PullRequest {
                entity_type,
                since: checkpoint.last_sync_time,
                include_deleted: true,
                checkpoint: checkpoint.pull_checkpoint(),
            }],
            push_requests,
        };
        drop(collection);

        debug!(
            %home_id,
            %entity_type,
            pushed = batch.envelopes.len(),
            since = checkpoint.last_pulled_version,
            "Sending batch"
        );
        let response = transport.batch_sync(request).await?;
        if !response.success {
            let reason = response
                .error
                .clone()
                .unwrap_or_else(|| "no reason given".to_string());
            return Err(ClientError::ServerRejected(reason));
        }
        let server_timestamp = response.server_timestamp;

        // Merge into a fresh copy, never the one read before the call.
        let mut collection = self.load(home_id).await?;
        let mut acc = DeltaAccumulator::new(entity_type);

        for set in response
            .push_results
            .iter()
            .flatten()
            .filter(|set| set.entity_type == entity_type)
        {
            for error in &set.errors {
                warn!(%home_id, %entity_type, error = %error, "Server reported push error");
            }
        }
        let issues = apply_push_outcomes::<E>(
            &mut collection,
            response.push_outcomes(entity_type),
            &batch,
            server_timestamp,
            &mut acc,
        );
        log_issues(entity_type, home_id, "push outcome not applied", &issues);

        let pulled_checkpoint = match response.pull_result(entity_type) {
            Some(pull) => {
                let issues = apply_pull::<E>(&mut collection, pull, server_timestamp, &mut acc);
                log_issues(entity_type, home_id, "pulled record not applied", &issues);
                pull.checkpoint
            }
            None => None,
        };
        collection.checkpoint.advance(pulled_checkpoint, server_timestamp);

        self.save(&collection).await?;

        let delta = acc.finish(server_timestamp);
        debug!(
            %home_id,
            %entity_type,
            created = delta.created.len(),
            updated = delta.updated.len(),
            deleted = delta.deleted.len(),
            confirmed = delta.confirmed.len(),
            remapped = delta.remapped.len(),
            "Sync pair complete"
        );
        for (old, new) in &delta.remapped {
            warn!(%home_id, %entity_type, %old, %new, "Record id rewritten by server");
        }
        Ok(delta)
    }
}

fn log_issues(entity_type: EntityType, home_id: &HomeId, what: &str, issues: &[MergeError]) {
    for issue in issues {
        warn!(%home_id, %entity_type, error = %issue, "{what}");
    }
}

/// Type-erased engine used by the orchestrator.
#[async_trait]
pub trait EntitySync: Send + Sync {
    /// Collection this engine syncs.
    fn entity_type(&self) -> EntityType;

    /// Make sure the collection exists for `home_id`.
    async fn initialize(&self, home_id: &HomeId) -> Result<(), ClientError>;

    /// Run one round trip; records in the delta are stored JSON values.
    async fn sync(
        &self,
        home_id: &HomeId,
        transport: &dyn RemoteSyncTransport,
        device_id: &DeviceId,
    ) -> Result<SyncDelta<Value>, ClientError>;
}

#[async_trait]
impl<E: SyncableEntity> EntitySync for SyncEngine<E> {
    fn entity_type(&self) -> EntityType {
        E::ENTITY_TYPE
    }

    async fn initialize(&self, home_id: &HomeId) -> Result<(), ClientError> {
        self.store.initialize(E::ENTITY_TYPE, home_id).await?;
        Ok(())
    }

    async fn sync(
        &self,
        home_id: &HomeId,
        transport: &dyn RemoteSyncTransport,
        device_id: &DeviceId,
    ) -> Result<SyncDelta<Value>, ClientError> {
        let delta = SyncEngine::sync(self, home_id, transport, device_id).await?;
        let delta = delta.try_map(|record| {
            serde_json::to_value(&record).map_err(|source| MappingError::Encode {
                entity_id: record.meta.id.clone(),
                source,
            })
        })?;
        Ok(delta)
    }
}

/// Build the engine for a registered entity type.
pub fn engine_for(descriptor: EntityDescriptor, store: Arc<dyn EntityStore>) -> Box<dyn EntitySync> {
    match descriptor.entity_type {
        EntityType::Homes => Box::new(SyncEngine::<HomeEntity>::with_descriptor(store, descriptor)),
        EntityType::Categories => {
            Box::new(SyncEngine::<CategoryEntity>::with_descriptor(store, descriptor))
        }
        EntityType::Locations => {
            Box::new(SyncEngine::<LocationEntity>::with_descriptor(store, descriptor))
        }
        EntityType::InventoryItems => Box::new(SyncEngine::<InventoryItemEntity>::with_descriptor(
            store, descriptor,
        )),
        EntityType::Todos => Box::new(SyncEngine::<TodoEntity>::with_descriptor(store, descriptor)),
        EntityType::TodoCategories => Box::new(
            SyncEngine::<TodoCategoryEntity>::with_descriptor(store, descriptor),
        ),
        EntityType::Settings => {
            Box::new(SyncEngine::<SettingsEntity>::with_descriptor(store, descriptor))
        }
    }
}
