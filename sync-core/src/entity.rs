//! Home-scoped record shape and its local lifecycle.
//!
//! Every synced record carries the same metadata ([`SyncMeta`]) next to its
//! domain fields. Local mutations only ever touch the metadata through the
//! methods here, so the version and pending-flag rules live in one place:
//!
//! - a mutation bumps `version` exactly once
//! - at most one pending flag is set at a time
//! - deleting a record that was never confirmed removes it outright

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sync_types::{EntityId, HomeId};
use thiserror::Error;

use crate::delta::Keyed;

/// Lifecycle violations for local mutations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    /// The record is a tombstone and cannot be mutated.
    #[error("record {0} is deleted")]
    Tombstoned(EntityId),

    /// The entity type keeps no tombstones and the record was already synced.
    #[error("records of this type cannot be deleted once synced: {0}")]
    DeleteUnsupported(EntityId),
}

/// What a local delete did to the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Never confirmed by the server; drop it from storage.
    HardRemove,
    /// Keep it as a pending tombstone so the delete propagates.
    Tombstone,
}

/// Sync metadata shared by every record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMeta {
    /// Record id
    pub id: EntityId,
    /// Partition the record lives in
    pub home_id: HomeId,
    /// Local mutation counter, starts at 1
    pub version: u64,
    /// First local write
    pub created_at: DateTime<Utc>,
    /// Last local or merged write
    pub updated_at: DateTime<Utc>,
    /// Last local mutation, sent to the server
    pub client_updated_at: DateTime<Utc>,
    /// When the server last accepted this record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_updated_at: Option<DateTime<Utc>>,
    /// When a sync cycle last touched this record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Created locally, not yet confirmed
    #[serde(default)]
    pub pending_create: bool,
    /// Updated locally, not yet confirmed
    #[serde(default)]
    pub pending_update: bool,
    /// Deleted locally, not yet confirmed
    #[serde(default)]
    pub pending_delete: bool,
    /// Set on soft-deleted records
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl SyncMeta {
    /// Metadata for a record created on this device.
    pub fn new_local(id: EntityId, home_id: HomeId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            home_id,
            version: 1,
            created_at: now,
            updated_at: now,
            client_updated_at: now,
            server_updated_at: None,
            last_synced_at: None,
            pending_create: true,
            pending_update: false,
            pending_delete: false,
            deleted_at: None,
        }
    }

    /// True if any local mutation awaits confirmation.
    pub fn is_pending(&self) -> bool {
        self.pending_create || self.pending_update || self.pending_delete
    }

    /// True for soft-deleted records.
    pub fn is_tombstone(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Record a local update.
    ///
    /// A record still waiting for its create to be confirmed stays
    /// `pending_create`; the server sees the latest fields either way.
    pub fn mark_updated(&mut self, now: DateTime<Utc>) -> Result<(), LifecycleError> {
        if self.is_tombstone() {
            return Err(LifecycleError::Tombstoned(self.id.clone()));
        }
        self.version += 1;
        self.updated_at = now;
        self.client_updated_at = now;
        if !self.pending_create {
            self.pending_update = true;
        }
        Ok(())
    }

    /// Record a local delete.
    ///
    /// Returns [`DeleteOutcome::HardRemove`] when the record never reached
    /// the server; the caller drops it without a network round trip.
    pub fn mark_deleted(&mut self, now: DateTime<Utc>) -> Result<DeleteOutcome, LifecycleError> {
        if self.is_tombstone() {
            return Err(LifecycleError::Tombstoned(self.id.clone()));
        }
        if self.pending_create {
            return Ok(DeleteOutcome::HardRemove);
        }
        self.version += 1;
        self.updated_at = now;
        self.client_updated_at = now;
        self.deleted_at = Some(now);
        self.pending_update = false;
        self.pending_delete = true;
        Ok(DeleteOutcome::Tombstone)
    }
}

/// A record: metadata plus domain fields, flattened into one JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record<F> {
    /// Sync metadata
    #[serde(flatten)]
    pub meta: SyncMeta,
    /// Domain payload
    #[serde(flatten)]
    pub fields: F,
}

impl<F> Record<F> {
    /// Record id.
    pub fn id(&self) -> &EntityId {
        &self.meta.id
    }

    /// Partition the record lives in.
    pub fn home_id(&self) -> &HomeId {
        &self.meta.home_id
    }
}

impl<F> Keyed for Record<F> {
    fn key(&self) -> &EntityId {
        &self.meta.id
    }
}
