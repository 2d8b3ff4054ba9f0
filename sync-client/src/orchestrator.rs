//! Cycle orchestration across homes and entity types.
//!
//! One cycle walks every locally known home and, within a home, every
//! registered entity type in registry order (`homes` first). A failing
//! pair is logged and reported; the remaining pairs still run. Cycles are
//! serialized: a second caller waits for the running cycle to finish.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use sync_core::{EntityRegistry, HomeFields, SyncDelta, TriggerKind};
use sync_types::{EntityType, HomeId};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::device::DeviceIdProvider;
use crate::engine::{engine_for, EntitySync};
use crate::error::ClientError;
use crate::scheduler::CycleRunner;
use crate::store::EntityStore;
use crate::transport::RemoteSyncTransport;

/// Capacity of the event channel; slow subscribers miss older events.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Notifications for UI layers.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// One pair changed local data. Pairs that only had pushes confirmed
    /// are not reported.
    Delta {
        /// Home synced
        home_id: HomeId,
        /// What changed; records are stored JSON values
        delta: Arc<SyncDelta<Value>>,
    },
    /// Data of the active home changed; views should reload.
    RefreshRequested {
        /// The active home
        home_id: HomeId,
    },
    /// A cycle ended.
    CycleCompleted(CycleReport),
}

/// A pair that failed during a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairFailure {
    /// Home being synced
    pub home_id: HomeId,
    /// Collection being synced
    pub entity_type: EntityType,
    /// Error text
    pub message: String,
    /// Whether the next cycle may succeed on its own
    pub retryable: bool,
}

/// Summary of one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Homes synced
    pub homes: usize,
    /// Pairs attempted
    pub attempted: usize,
    /// Pairs that completed
    pub succeeded: usize,
    /// Pairs with local changes
    pub changed: usize,
    /// Failed pairs
    pub failures: Vec<PairFailure>,
}

impl CycleReport {
    /// Number of failed pairs.
    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    /// True if every attempted pair completed.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    fn merge(&mut self, other: CycleReport) {
        self.homes += other.homes;
        self.attempted += other.attempted;
        self.succeeded += other.succeeded;
        self.changed += other.changed;
        self.failures.extend(other.failures);
    }
}

/// Runs sync cycles for all homes.
pub struct SyncOrchestrator {
    store: Arc<dyn EntityStore>,
    transport: Arc<dyn RemoteSyncTransport>,
    device: Arc<dyn DeviceIdProvider>,
    registry: EntityRegistry,
    engines: Vec<Box<dyn EntitySync>>,
    events: broadcast::Sender<SyncEvent>,
    active_home: Mutex<Option<HomeId>>,
    leaving: Mutex<HashSet<HomeId>>,
    cycle_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for SyncOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("registry", &self.registry)
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SyncOrchestrator {
    /// Build engines for every registered type.
    pub fn new(
        store: Arc<dyn EntityStore>,
        transport: Arc<dyn RemoteSyncTransport>,
        device: Arc<dyn DeviceIdProvider>,
        registry: EntityRegistry,
    ) -> Self {
        let engines = registry
            .ordered()
            .iter()
            .map(|descriptor| engine_for(*descriptor, store.clone()))
            .collect();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            store,
            transport,
            device,
            registry,
            engines,
            events,
            active_home: Mutex::new(None),
            leaving: Mutex::new(HashSet::new()),
            cycle_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Registry in use.
    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    /// Receive events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Home whose views receive refresh requests.
    pub fn set_active_home(&self, home_id: Option<HomeId>) {
        *lock(&self.active_home) = home_id;
    }

    /// Stop syncing a home the user is leaving.
    pub fn mark_leaving(&self, home_id: HomeId) {
        lock(&self.leaving).insert(home_id);
    }

    /// Resume syncing a home.
    pub fn clear_leaving(&self, home_id: &HomeId) {
        lock(&self.leaving).remove(home_id);
    }

    fn emit(&self, event: SyncEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Homes eligible for this cycle.
    async fn eligible_homes(&self) -> Result<Vec<HomeId>, ClientError> {
        let mut homes = Vec::new();
        for home_id in self.store.home_ids().await? {
            let leaving = lock(&self.leaving).contains(&home_id);
            if leaving {
                debug!(%home_id, "Skipping home being left");
                continue;
            }
            let stored = self.store.read(EntityType::Homes, &home_id).await?;
            let (collection, _) = stored.into_local::<HomeFields>(&home_id);
            let retired = collection
                .get(&home_id.as_entity())
                .is_some_and(|home| home.meta.is_tombstone() || home.meta.pending_delete);
            if retired {
                debug!(%home_id, "Skipping deleted home");
                continue;
            }
            homes.push(home_id);
        }
        Ok(homes)
    }

    /// Sync every eligible home.
    pub async fn run_cycle(&self) -> CycleReport {
        let _guard = self.cycle_lock.lock().await;
        let started = Instant::now();
        let mut report = CycleReport::default();

        match self.eligible_homes().await {
            Ok(homes) => {
                for home_id in homes {
                    report.merge(self.sync_home_locked(&home_id).await);
                }
            }
            Err(e) => {
                warn!(error = %e, "Could not list homes");
                report.failures.push(PairFailure {
                    home_id: HomeId::new(""),
                    entity_type: EntityType::Homes,
                    message: e.to_string(),
                    retryable: e.is_retryable(),
                });
            }
        }

        info!(
            homes = report.homes,
            succeeded = report.succeeded,
            failed = report.failed(),
            changed = report.changed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Sync cycle complete"
        );
        self.emit(SyncEvent::CycleCompleted(report.clone()));
        report
    }

    /// Sync a single home, eligible or not.
    pub async fn sync_home(&self, home_id: &HomeId) -> CycleReport {
        let _guard = self.cycle_lock.lock().await;
        let report = self.sync_home_locked(home_id).await;
        self.emit(SyncEvent::CycleCompleted(report.clone()));
        report
    }

    async fn sync_home_locked(&self, home_id: &HomeId) -> CycleReport {
        let mut report = CycleReport {
            homes: 1,
            ..CycleReport::default()
        };
        let device_id = self.device.device_id();

        for engine in &self.engines {
            if let Err(e) = engine.initialize(home_id).await {
                warn!(%home_id, entity_type = %engine.entity_type(), error = %e, "Could not initialize collection");
            }
        }

        let mut refresh = false;
        for engine in &self.engines {
            let entity_type = engine.entity_type();
            report.attempted += 1;
            match engine.sync(home_id, self.transport.as_ref(), &device_id).await {
                Ok(delta) => {
                    report.succeeded += 1;
                    if !delta.unchanged() || !delta.remapped.is_empty() {
                        report.changed += 1;
                        refresh = true;
                        self.emit(SyncEvent::Delta {
                            home_id: home_id.clone(),
                            delta: Arc::new(delta),
                        });
                    }
                }
                Err(e) => {
                    warn!(%home_id, %entity_type, error = %e, "Sync pair failed");
                    report.failures.push(PairFailure {
                        home_id: home_id.clone(),
                        entity_type,
                        message: e.to_string(),
                        retryable: e.is_retryable(),
                    });
                }
            }
        }

        let active = lock(&self.active_home).as_ref() == Some(home_id);
        if refresh && active {
            self.emit(SyncEvent::RefreshRequested {
                home_id: home_id.clone(),
            });
        }
        report
    }
}

#[async_trait]
impl CycleRunner for SyncOrchestrator {
    async fn run_cycle(&self, trigger: TriggerKind) {
        debug!(?trigger, "Cycle triggered");
        SyncOrchestrator::run_cycle(self).await;
    }
}
