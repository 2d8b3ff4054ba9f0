//! In-process sync server.
//!
//! `LoopbackRemote` answers batch requests the way the hosted service does:
//! per-home partitions, a change sequence per collection for pull
//! checkpoints, version-based conflict detection with the server copy
//! winning ties, id collision detection across homes, and child pushes
//! refused until their home exists. Used by tests and by the CLI's
//! `--loopback` mode, which persists the state to a JSON file.

use super::{RemoteSyncTransport, TransportError};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use sync_types::{
    BatchSyncRequest, BatchSyncResponse, EntityId, EntityType, HomeId, PendingEnvelope,
    PullCheckpoint, PullRequest, PullResult, PushOutcome, PushRequest, PushResultSet, PushStatus,
    WireEntity, Winner,
};
use tracing::debug;

/// Server-side copy of one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerRecord {
    /// Record payload
    pub data: Value,
    /// Authoritative version
    pub version: u64,
    /// Client edit time that produced this version
    pub client_updated_at: DateTime<Utc>,
    /// When the server accepted it
    pub updated_at: DateTime<Utc>,
    /// Deleted on the server
    pub deleted: bool,
    /// Collection change sequence at the last write
    pub change_seq: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Partition {
    seq: u64,
    records: BTreeMap<EntityId, ServerRecord>,
}

impl Partition {
    fn write(&mut self, id: EntityId, mut record: ServerRecord) {
        self.seq += 1;
        record.change_seq = self.seq;
        self.records.insert(id, record);
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerState {
    partitions: BTreeMap<HomeId, BTreeMap<EntityType, Partition>>,
    owners: BTreeMap<EntityType, BTreeMap<EntityId, HomeId>>,
    last_timestamp: Option<DateTime<Utc>>,
    #[serde(skip)]
    offline: bool,
    #[serde(skip)]
    reject_next: Option<String>,
    #[serde(skip)]
    requests: usize,
}

impl ServerState {
    /// Strictly increasing server clock.
    fn tick(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let now = match self.last_timestamp {
            Some(last) if now <= last => last + Duration::milliseconds(1),
            _ => now,
        };
        self.last_timestamp = Some(now);
        now
    }

    fn partition(&mut self, home_id: &HomeId, entity_type: EntityType) -> &mut Partition {
        self.partitions
            .entry(home_id.clone())
            .or_default()
            .entry(entity_type)
            .or_default()
    }

    fn get(
        &self,
        home_id: &HomeId,
        entity_type: EntityType,
        id: &EntityId,
    ) -> Option<&ServerRecord> {
        self.partitions
            .get(home_id)?
            .get(&entity_type)?
            .records
            .get(id)
    }

    fn home_exists(&self, home_id: &HomeId) -> bool {
        self.get(home_id, EntityType::Homes, &home_id.as_entity())
            .is_some_and(|home| !home.deleted)
    }

    fn handle(&mut self, request: BatchSyncRequest) -> BatchSyncResponse {
        let now = self.tick();
        if let Some(reason) = self.reject_next.take() {
            return BatchSyncResponse::rejected(now, reason);
        }
        if request.home_id.as_str().is_empty() {
            return BatchSyncResponse::rejected(now, "homeId is required");
        }

        let push_results = request.push_requests.as_ref().map(|pushes| {
            pushes
                .iter()
                .map(|push| self.apply_push(&request.home_id, push, now))
                .collect()
        });
        let pull_results = request
            .pull_requests
            .iter()
            .map(|pull| self.pull(&request.home_id, pull))
            .collect();

        BatchSyncResponse {
            success: true,
            server_timestamp: now,
            pull_results: Some(pull_results),
            push_results,
            error: None,
        }
    }

    fn apply_push(
        &mut self,
        home_id: &HomeId,
        push: &PushRequest,
        now: DateTime<Utc>,
    ) -> PushResultSet {
        let results = push
            .entities
            .iter()
            .map(|envelope| self.apply_envelope(home_id, push.entity_type, envelope, now))
            .collect();
        PushResultSet {
            entity_type: push.entity_type,
            results,
            errors: Vec::new(),
        }
    }

    fn apply_envelope(
        &mut self,
        home_id: &HomeId,
        entity_type: EntityType,
        envelope: &PendingEnvelope,
        now: DateTime<Utc>,
    ) -> PushOutcome {
        let id = &envelope.entity_id;

        if &envelope.home_id != home_id {
            return error(id, "HOME_MISMATCH", "record belongs to another home", None);
        }
        if entity_type == EntityType::Homes {
            if id != &home_id.as_entity() {
                return error(id, "HOME_MISMATCH", "home id must match the request", None);
            }
        } else if !self.home_exists(home_id) {
            return error(id, "HOME_NOT_FOUND", "home does not exist", None);
        }

        let owner = self.owners.get(&entity_type).and_then(|o| o.get(id));
        if owner.is_some_and(|owner| owner != home_id) {
            let suggested = EntityId::generate();
            return error(
                id,
                "ID_COLLISION",
                "id already used in another home",
                Some(suggested.to_string()),
            );
        }

        let existing = self.get(home_id, entity_type, id).cloned();

        if envelope.pending_delete {
            if let Some(mut record) = existing.filter(|r| !r.deleted) {
                record.deleted = true;
                record.updated_at = now;
                self.partition(home_id, entity_type).write(id.clone(), record);
            }
            let mut outcome = PushOutcome::new(id.clone(), PushStatus::Deleted);
            outcome.server_updated_at = Some(now);
            return outcome;
        }

        let accepted = ServerRecord {
            data: envelope.data.clone(),
            version: envelope.version,
            client_updated_at: envelope.client_updated_at,
            updated_at: now,
            deleted: false,
            change_seq: 0,
        };

        let status = match &existing {
            None => PushStatus::Created,
            Some(current) if envelope.version > current.version => {
                if current.deleted {
                    PushStatus::Created
                } else {
                    PushStatus::Updated
                }
            }
            Some(current) if current.deleted => {
                return error(id, "GONE", "record was deleted on the server", None);
            }
            Some(current) => {
                let mut outcome = PushOutcome::new(id.clone(), PushStatus::ServerVersion);
                outcome.server_updated_at = Some(current.updated_at);
                outcome.server_version = Some(current.version);
                outcome.server_version_data = Some(current.data.clone());
                outcome.winner = Some(Winner::Server);
                return outcome;
            }
        };

        self.owners
            .entry(entity_type)
            .or_default()
            .insert(id.clone(), home_id.clone());
        self.partition(home_id, entity_type)
            .write(id.clone(), accepted);

        let mut outcome = PushOutcome::new(id.clone(), status);
        outcome.server_updated_at = Some(now);
        if status == PushStatus::Created {
            outcome.server_version = Some(envelope.version);
        }
        outcome
    }

    fn pull(&mut self, home_id: &HomeId, pull: &PullRequest) -> PullResult {
        let partition = self.partition(home_id, pull.entity_type);
        let since = pull.checkpoint.last_pulled_version;

        let mut entities = Vec::new();
        let mut deleted_entity_ids = Vec::new();
        for (id, record) in &partition.records {
            if record.change_seq <= since {
                continue;
            }
            if record.deleted {
                if pull.include_deleted {
                    deleted_entity_ids.push(id.clone());
                }
            } else {
                entities.push(WireEntity {
                    entity_id: id.clone(),
                    data: record.data.clone(),
                    version: record.version,
                    client_updated_at: record.client_updated_at,
                    updated_at: record.updated_at,
                });
            }
        }

        PullResult {
            entity_type: pull.entity_type,
            entities,
            deleted_entity_ids,
            checkpoint: Some(PullCheckpoint {
                last_pulled_version: partition.seq,
            }),
        }
    }
}

fn error(id: &EntityId, code: &str, message: &str, suggested: Option<String>) -> PushOutcome {
    let mut outcome = PushOutcome::new(id.clone(), PushStatus::Error);
    outcome.code = Some(code.to_string());
    outcome.message = Some(message.to_string());
    outcome.suggested_home_id = suggested;
    outcome
}

/// In-process sync server. Clones share state.
#[derive(Debug, Default, Clone)]
pub struct LoopbackRemote {
    state: Arc<Mutex<ServerState>>,
}

impl LoopbackRemote {
    /// An empty server.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Restore a server from `path`, or start empty if it does not exist.
    pub async fn load(path: &Path) -> Result<Self, TransportError> {
        let state = match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                TransportError::Config(format!("{}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ServerState::default(),
            Err(e) => {
                return Err(TransportError::Config(format!("{}: {e}", path.display())));
            }
        };
        Ok(Self {
            state: Arc::new(Mutex::new(state)),
        })
    }

    /// Persist the server state to `path`.
    pub async fn save(&self, path: &Path) -> Result<(), TransportError> {
        let bytes = serde_json::to_vec_pretty(&*self.lock())
            .map_err(|e| TransportError::Config(e.to_string()))?;
        tokio::fs::write(path, bytes)
            .await
            .map_err(|e| TransportError::Config(format!("{}: {e}", path.display())))
    }

    /// Simulate losing connectivity.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Answer the next request with `success: false`.
    pub fn reject_next(&self, reason: &str) {
        self.lock().reject_next = Some(reason.to_string());
    }

    /// Number of requests received.
    pub fn request_count(&self) -> usize {
        self.lock().requests
    }

    /// Server copy of a record.
    pub fn record(
        &self,
        home_id: &HomeId,
        entity_type: EntityType,
        id: &EntityId,
    ) -> Option<ServerRecord> {
        self.lock().get(home_id, entity_type, id).cloned()
    }

    /// Ids of live records in a collection.
    pub fn live_ids(&self, home_id: &HomeId, entity_type: EntityType) -> Vec<EntityId> {
        let state = self.lock();
        state
            .partitions
            .get(home_id)
            .and_then(|p| p.get(&entity_type))
            .map(|p| {
                p.records
                    .iter()
                    .filter(|(_, r)| !r.deleted)
                    .map(|(id, _)| id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Write a record as another client would, bumping its version.
    pub fn server_edit(
        &self,
        home_id: &HomeId,
        entity_type: EntityType,
        id: &EntityId,
        data: Value,
    ) -> u64 {
        let mut state = self.lock();
        let now = state.tick();
        let version = state
            .get(home_id, entity_type, id)
            .map_or(1, |r| r.version + 1);
        state
            .owners
            .entry(entity_type)
            .or_default()
            .insert(id.clone(), home_id.clone());
        state.partition(home_id, entity_type).write(
            id.clone(),
            ServerRecord {
                data,
                version,
                client_updated_at: now,
                updated_at: now,
                deleted: false,
                change_seq: 0,
            },
        );
        version
    }

    /// Delete a record as another client would.
    pub fn server_delete(&self, home_id: &HomeId, entity_type: EntityType, id: &EntityId) -> bool {
        let mut state = self.lock();
        let now = state.tick();
        let Some(mut record) = state.get(home_id, entity_type, id).cloned() else {
            return false;
        };
        record.deleted = true;
        record.updated_at = now;
        state.partition(home_id, entity_type).write(id.clone(), record);
        true
    }
}

#[async_trait]
impl RemoteSyncTransport for LoopbackRemote {
    async fn batch_sync(
        &self,
        request: BatchSyncRequest,
    ) -> Result<BatchSyncResponse, TransportError> {
        let mut state = self.lock();
        state.requests += 1;
        if state.offline {
            return Err(TransportError::Unavailable("loopback offline".to_string()));
        }
        debug!(
            home_id = %request.home_id,
            pulls = request.pull_requests.len(),
            pushes = request.push_requests.as_ref().map_or(0, Vec::len),
            "Loopback batch"
        );
        Ok(state.handle(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sync_types::DeviceId;

    fn home() -> HomeId {
        HomeId::new("h1")
    }

    fn envelope(entity_type: EntityType, id: &str, home: &str, version: u64) -> PendingEnvelope {
        PendingEnvelope {
            entity_id: EntityId::new(id),
            entity_type,
            home_id: HomeId::new(home),
            data: json!({"name": id}),
            version,
            client_updated_at: Utc::now(),
            pending_create: version == 1,
            pending_delete: false,
        }
    }

    fn push(home: &str, pushes: Vec<(EntityType, Vec<PendingEnvelope>)>) -> BatchSyncRequest {
        BatchSyncRequest {
            home_id: HomeId::new(home),
            device_id: DeviceId::new("d1"),
            pull_requests: vec![],
            push_requests: Some(
                pushes
                    .into_iter()
                    .map(|(entity_type, entities)| PushRequest {
                        entity_type,
                        entities,
                        last_pulled_at: None,
                        checkpoint: PullCheckpoint::default(),
                    })
                    .collect(),
            ),
        }
    }

    fn pull_from(home: &str, entity_type: EntityType, since: u64) -> BatchSyncRequest {
        BatchSyncRequest {
            home_id: HomeId::new(home),
            device_id: DeviceId::new("d1"),
            pull_requests: vec![PullRequest {
                entity_type,
                since: None,
                include_deleted: true,
                checkpoint: PullCheckpoint {
                    last_pulled_version: since,
                },
            }],
            push_requests: None,
        }
    }

    async fn create_home(remote: &LoopbackRemote, home: &str) {
        remote
            .batch_sync(push(
                home,
                vec![(EntityType::Homes, vec![envelope(EntityType::Homes, home, home, 1)])],
            ))
            .await
            .unwrap();
    }

    fn statuses(response: &BatchSyncResponse, entity_type: EntityType) -> Vec<PushStatus> {
        response.push_outcomes(entity_type).map(|o| o.status).collect()
    }

    #[tokio::test]
    async fn create_then_pull() {
        let remote = LoopbackRemote::new();
        create_home(&remote, "h1").await;

        let response = remote
            .batch_sync(push(
                "h1",
                vec![(EntityType::Todos, vec![envelope(EntityType::Todos, "a1", "h1", 1)])],
            ))
            .await
            .unwrap();
        assert_eq!(statuses(&response, EntityType::Todos), vec![PushStatus::Created]);

        let response = remote
            .batch_sync(pull_from("h1", EntityType::Todos, 0))
            .await
            .unwrap();
        let pulled = response.pull_result(EntityType::Todos).unwrap();
        assert_eq!(pulled.entities.len(), 1);
        assert_eq!(pulled.checkpoint.unwrap().last_pulled_version, 1);

        let response = remote
            .batch_sync(pull_from("h1", EntityType::Todos, 1))
            .await
            .unwrap();
        assert!(response.pull_result(EntityType::Todos).unwrap().entities.is_empty());
    }

    #[tokio::test]
    async fn child_before_home_is_refused() {
        let remote = LoopbackRemote::new();
        let response = remote
            .batch_sync(push(
                "h1",
                vec![(EntityType::Todos, vec![envelope(EntityType::Todos, "a1", "h1", 1)])],
            ))
            .await
            .unwrap();
        let outcome = response.push_outcomes(EntityType::Todos).next().unwrap();
        assert_eq!(outcome.status, PushStatus::Error);
        assert_eq!(outcome.code.as_deref(), Some("HOME_NOT_FOUND"));
    }

    #[tokio::test]
    async fn home_and_children_in_one_batch() {
        let remote = LoopbackRemote::new();
        let response = remote
            .batch_sync(push(
                "h1",
                vec![
                    (EntityType::Homes, vec![envelope(EntityType::Homes, "h1", "h1", 1)]),
                    (EntityType::Todos, vec![envelope(EntityType::Todos, "a1", "h1", 1)]),
                ],
            ))
            .await
            .unwrap();
        assert_eq!(statuses(&response, EntityType::Homes), vec![PushStatus::Created]);
        assert_eq!(statuses(&response, EntityType::Todos), vec![PushStatus::Created]);
    }

    #[tokio::test]
    async fn stale_version_returns_server_copy() {
        let remote = LoopbackRemote::new();
        create_home(&remote, "h1").await;
        remote.server_edit(&home(), EntityType::Todos, &EntityId::new("a1"), json!({"v": 1}));
        remote.server_edit(&home(), EntityType::Todos, &EntityId::new("a1"), json!({"v": 2}));

        let response = remote
            .batch_sync(push(
                "h1",
                vec![(EntityType::Todos, vec![envelope(EntityType::Todos, "a1", "h1", 2)])],
            ))
            .await
            .unwrap();
        let outcome = response.push_outcomes(EntityType::Todos).next().unwrap();
        assert_eq!(outcome.status, PushStatus::ServerVersion);
        assert_eq!(outcome.winner, Some(Winner::Server));
        assert_eq!(outcome.server_version, Some(2));
        assert_eq!(outcome.server_version_data, Some(json!({"v": 2})));
    }

    #[tokio::test]
    async fn newer_version_is_accepted() {
        let remote = LoopbackRemote::new();
        create_home(&remote, "h1").await;
        remote.server_edit(&home(), EntityType::Todos, &EntityId::new("a1"), json!({"v": 1}));

        let response = remote
            .batch_sync(push(
                "h1",
                vec![(EntityType::Todos, vec![envelope(EntityType::Todos, "a1", "h1", 2)])],
            ))
            .await
            .unwrap();
        assert_eq!(statuses(&response, EntityType::Todos), vec![PushStatus::Updated]);
        let record = remote.record(&home(), EntityType::Todos, &EntityId::new("a1")).unwrap();
        assert_eq!(record.version, 2);
    }

    #[tokio::test]
    async fn id_used_by_another_home_collides() {
        let remote = LoopbackRemote::new();
        create_home(&remote, "h1").await;
        create_home(&remote, "h2").await;
        remote.server_edit(&home(), EntityType::Todos, &EntityId::new("a1"), json!({}));

        let response = remote
            .batch_sync(push(
                "h2",
                vec![(EntityType::Todos, vec![envelope(EntityType::Todos, "a1", "h2", 1)])],
            ))
            .await
            .unwrap();
        let outcome = response.push_outcomes(EntityType::Todos).next().unwrap();
        assert_eq!(outcome.code.as_deref(), Some("ID_COLLISION"));
        assert!(outcome.suggested_home_id.is_some());
    }

    #[tokio::test]
    async fn deletes_are_pulled_as_ids() {
        let remote = LoopbackRemote::new();
        create_home(&remote, "h1").await;
        remote.server_edit(&home(), EntityType::Todos, &EntityId::new("a1"), json!({}));
        assert!(remote.server_delete(&home(), EntityType::Todos, &EntityId::new("a1")));

        let response = remote
            .batch_sync(pull_from("h1", EntityType::Todos, 0))
            .await
            .unwrap();
        let pulled = response.pull_result(EntityType::Todos).unwrap();
        assert!(pulled.entities.is_empty());
        assert_eq!(pulled.deleted_entity_ids, vec![EntityId::new("a1")]);
        assert!(remote.live_ids(&home(), EntityType::Todos).is_empty());
    }

    #[tokio::test]
    async fn offline_and_rejection() {
        let remote = LoopbackRemote::new();
        remote.set_offline(true);
        assert!(remote.batch_sync(pull_from("h1", EntityType::Todos, 0)).await.is_err());

        remote.set_offline(false);
        remote.reject_next("maintenance");
        let response = remote
            .batch_sync(pull_from("h1", EntityType::Todos, 0))
            .await
            .unwrap();
        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some("maintenance"));
        assert_eq!(remote.request_count(), 2);
    }

    #[tokio::test]
    async fn server_timestamps_increase() {
        let remote = LoopbackRemote::new();
        let a = remote.batch_sync(pull_from("h1", EntityType::Todos, 0)).await.unwrap();
        let b = remote.batch_sync(pull_from("h1", EntityType::Todos, 0)).await.unwrap();
        assert!(b.server_timestamp > a.server_timestamp);
    }

    #[tokio::test]
    async fn state_survives_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.json");

        let remote = LoopbackRemote::new();
        create_home(&remote, "h1").await;
        remote.save(&path).await.unwrap();

        let restored = LoopbackRemote::load(&path).await.unwrap();
        assert_eq!(restored.live_ids(&home(), EntityType::Homes), vec![EntityId::new("h1")]);

        let empty = LoopbackRemote::load(&dir.path().join("absent.json")).await.unwrap();
        assert_eq!(empty.request_count(), 0);
    }
}
