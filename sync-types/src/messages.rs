//! Protocol messages for Homestock sync.
//!
//! One round trip carries both directions: a [`BatchSyncRequest`] with an
//! optional push section and a mandatory pull section, answered by a single
//! [`BatchSyncResponse`]. Field names are camelCase on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{DeviceId, EntityId, EntityType, HomeId, WireError};

/// Combined push+pull request for one home.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSyncRequest {
    /// Home the request is scoped to
    pub home_id: HomeId,
    /// Device issuing the request
    pub device_id: DeviceId,
    /// Pull section (always present)
    pub pull_requests: Vec<PullRequest>,
    /// Push section, omitted entirely when nothing is pending
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_requests: Option<Vec<PushRequest>>,
}

impl BatchSyncRequest {
    /// Serialize to JSON bytes.
    pub fn to_json(&self) -> Result<Vec<u8>, WireError> {
        serde_json::to_vec(self).map_err(WireError::Serialization)
    }

    /// Deserialize from JSON bytes.
    pub fn from_json(bytes: &[u8]) -> Result<Self, WireError> {
        serde_json::from_slice(bytes).map_err(WireError::Deserialization)
    }

    /// Entity types this request pushes, in request order.
    pub fn pushed_entity_types(&self) -> Vec<EntityType> {
        self.push_requests
            .iter()
            .flatten()
            .map(|p| p.entity_type)
            .collect()
    }
}

/// Server-issued pull cursor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullCheckpoint {
    /// Highest change version the client has pulled
    pub last_pulled_version: u64,
}

/// Pull section for one entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    /// Collection to pull
    pub entity_type: EntityType,
    /// Last successful sync time for this collection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<Utc>>,
    /// Whether tombstones should be returned as deleted ids
    pub include_deleted: bool,
    /// Cursor to resume from
    pub checkpoint: PullCheckpoint,
}

/// Push section for one entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    /// Collection being pushed
    pub entity_type: EntityType,
    /// Pending local mutations
    pub entities: Vec<PendingEnvelope>,
    /// When this collection was last pulled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_pulled_at: Option<DateTime<Utc>>,
    /// Client's current pull cursor
    pub checkpoint: PullCheckpoint,
}

/// A single pending local mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingEnvelope {
    /// Record id
    pub entity_id: EntityId,
    /// Record collection
    pub entity_type: EntityType,
    /// Home the record belongs to
    pub home_id: HomeId,
    /// Domain payload
    pub data: Value,
    /// Local version after the mutation
    pub version: u64,
    /// When the client made the change
    pub client_updated_at: DateTime<Utc>,
    /// Record was created locally and never confirmed
    pub pending_create: bool,
    /// Record was deleted locally
    pub pending_delete: bool,
}

/// Response to a [`BatchSyncRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSyncResponse {
    /// False when the server rejected the whole batch
    pub success: bool,
    /// Server clock at response time
    pub server_timestamp: DateTime<Utc>,
    /// Pull results per entity type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_results: Option<Vec<PullResult>>,
    /// Push results per entity type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_results: Option<Vec<PushResultSet>>,
    /// Rejection reason when `success` is false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchSyncResponse {
    /// A successful response with no results.
    pub fn empty(server_timestamp: DateTime<Utc>) -> Self {
        Self {
            success: true,
            server_timestamp,
            pull_results: None,
            push_results: None,
            error: None,
        }
    }

    /// A rejected batch.
    pub fn rejected(server_timestamp: DateTime<Utc>, reason: impl Into<String>) -> Self {
        Self {
            success: false,
            server_timestamp,
            pull_results: None,
            push_results: None,
            error: Some(reason.into()),
        }
    }

    /// Serialize to JSON bytes.
    pub fn to_json(&self) -> Result<Vec<u8>, WireError> {
        serde_json::to_vec(self).map_err(WireError::Serialization)
    }

    /// Deserialize from JSON bytes.
    pub fn from_json(bytes: &[u8]) -> Result<Self, WireError> {
        serde_json::from_slice(bytes).map_err(WireError::Deserialization)
    }

    /// Pull result for one entity type, if the server returned one.
    pub fn pull_result(&self, entity_type: EntityType) -> Option<&PullResult> {
        self.pull_results
            .iter()
            .flatten()
            .find(|r| r.entity_type == entity_type)
    }

    /// All push outcomes for one entity type.
    pub fn push_outcomes(&self, entity_type: EntityType) -> impl Iterator<Item = &PushOutcome> {
        self.push_results
            .iter()
            .flatten()
            .filter(move |r| r.entity_type == entity_type)
            .flat_map(|r| r.results.iter())
    }
}

/// Pulled changes for one entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResult {
    /// Collection the changes belong to
    pub entity_type: EntityType,
    /// Live records changed since the checkpoint
    #[serde(default)]
    pub entities: Vec<WireEntity>,
    /// Records deleted since the checkpoint
    #[serde(default)]
    pub deleted_entity_ids: Vec<EntityId>,
    /// New cursor; absent means "leave the local cursor alone"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<PullCheckpoint>,
}

/// A record as returned by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireEntity {
    /// Record id
    pub entity_id: EntityId,
    /// Domain payload
    pub data: Value,
    /// Server version
    pub version: u64,
    /// When the authoring client made the change
    pub client_updated_at: DateTime<Utc>,
    /// When the server accepted the change
    pub updated_at: DateTime<Utc>,
}

/// Push outcomes for one entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResultSet {
    /// Collection the outcomes belong to
    pub entity_type: EntityType,
    /// One outcome per submitted entity
    #[serde(default)]
    pub results: Vec<PushOutcome>,
    /// Batch-level error messages
    #[serde(default)]
    pub errors: Vec<String>,
}

/// How the server handled one pushed entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushStatus {
    /// Create accepted
    Created,
    /// Update accepted
    Updated,
    /// Conflict: the server copy wins and is returned
    ServerVersion,
    /// Delete accepted
    Deleted,
    /// Rejected, possibly with a remediation
    Error,
}

/// Which side won a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Winner {
    /// The server copy was kept
    Server,
    /// The client copy was kept
    Client,
}

/// Outcome for one pushed entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushOutcome {
    /// Record id as submitted
    pub entity_id: EntityId,
    /// What the server did
    pub status: PushStatus,
    /// When the server accepted the change
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_updated_at: Option<DateTime<Utc>>,
    /// Authoritative version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_version: Option<u64>,
    /// Conflict winner
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner: Option<Winner>,
    /// Server payload for `server_version` outcomes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_version_data: Option<Value>,
    /// Machine-readable error code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Human-readable error message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Replacement id when the submitted id collided
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_home_id: Option<String>,
}

impl PushOutcome {
    /// An outcome with only id and status set.
    pub fn new(entity_id: EntityId, status: PushStatus) -> Self {
        Self {
            entity_id,
            status,
            server_updated_at: None,
            server_version: None,
            winner: None,
            server_version_data: None,
            code: None,
            message: None,
            suggested_home_id: None,
        }
    }
}
