//! Per-entity-type mapping between local records and the wire.
//!
//! The sync engine is generic over [`SyncableEntity`]; it never branches on
//! the entity type. Each kind supplies its domain field type, how create
//! and update inputs change those fields, and a validation hook. Id
//! generation, wire encoding and envelope building have shared defaults.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Debug;
use sync_types::{EntityId, EntityType, HomeId, PendingEnvelope};
use thiserror::Error;

use crate::entity::{DeleteOutcome, LifecycleError, Record, SyncMeta};

/// Errors converting between records and wire payloads.
#[derive(Debug, Error)]
pub enum MappingError {
    /// Domain fields could not be encoded.
    #[error("failed to encode {entity_id}: {source}")]
    Encode {
        /// Record being encoded
        entity_id: EntityId,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },

    /// A wire payload or stored record could not be decoded.
    #[error("failed to decode {entity_id}: {source}")]
    Decode {
        /// Record being decoded
        entity_id: EntityId,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },
}

/// Domain validation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required text field is blank.
    #[error("{0} must not be empty")]
    Empty(&'static str),

    /// A field holds a value outside its domain.
    #[error("{field} is invalid: {reason}")]
    Invalid {
        /// Offending field
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },

    /// The payload does not have the shape of this entity type.
    #[error("malformed payload: {0}")]
    Malformed(String),
}

/// Server-side metadata accompanying a pulled payload.
#[derive(Debug, Clone, PartialEq)]
pub struct WireMeta {
    /// Record id
    pub entity_id: EntityId,
    /// Partition the record was pulled for
    pub home_id: HomeId,
    /// Server version
    pub version: u64,
    /// When the server accepted the change
    pub updated_at: DateTime<Utc>,
    /// When the authoring client made the change
    pub client_updated_at: DateTime<Utc>,
    /// Response timestamp of the cycle doing the merge
    pub server_timestamp: DateTime<Utc>,
}

/// Mapping configuration for one entity type.
///
/// Implementors are zero-sized markers; all methods are associated
/// functions so the engine can be monomorphised per type.
pub trait SyncableEntity: Sized + Send + Sync + 'static {
    /// Domain fields stored next to [`SyncMeta`] and sent as wire `data`.
    type Fields: Serialize + DeserializeOwned + Clone + Debug + PartialEq + Send + Sync + 'static;
    /// Input for a local create.
    type Create: Send;
    /// Input for a local update.
    type Update: Send;

    /// Collection this mapping serves.
    const ENTITY_TYPE: EntityType;

    /// Whether synced records are kept as tombstones when deleted.
    const SUPPORTS_SOFT_DELETE: bool = true;

    /// Build the domain fields for a new record.
    fn create_fields(input: Self::Create, now: DateTime<Utc>) -> Self::Fields;

    /// Apply an update input to existing domain fields.
    fn update_fields(fields: &mut Self::Fields, updates: Self::Update, now: DateTime<Utc>);

    /// Domain validation run before a record is pushed.
    fn validate(_fields: &Self::Fields) -> Result<(), ValidationError> {
        Ok(())
    }

    /// Id for a record created locally in `home_id`.
    fn generate_id(_home_id: &HomeId) -> EntityId {
        EntityId::generate()
    }

    /// Encode a record's domain fields as wire `data`.
    fn to_wire(record: &Record<Self::Fields>) -> Result<Value, MappingError> {
        serde_json::to_value(&record.fields).map_err(|source| MappingError::Encode {
            entity_id: record.meta.id.clone(),
            source,
        })
    }

    /// Decode wire `data` into a confirmed record.
    fn from_wire(data: &Value, meta: &WireMeta) -> Result<Record<Self::Fields>, MappingError> {
        let fields = decode_fields::<Self>(data, &meta.entity_id)?;
        Ok(Record {
            meta: SyncMeta {
                id: meta.entity_id.clone(),
                home_id: meta.home_id.clone(),
                version: meta.version,
                created_at: meta.updated_at,
                updated_at: meta.updated_at,
                client_updated_at: meta.client_updated_at,
                server_updated_at: Some(meta.updated_at),
                last_synced_at: Some(meta.server_timestamp),
                pending_create: false,
                pending_update: false,
                pending_delete: false,
                deleted_at: None,
            },
            fields,
        })
    }

    /// Build the push envelope for a pending record.
    fn to_pending_envelope(
        record: &Record<Self::Fields>,
        home_id: &HomeId,
    ) -> Result<PendingEnvelope, MappingError> {
        Ok(PendingEnvelope {
            entity_id: record.meta.id.clone(),
            entity_type: Self::ENTITY_TYPE,
            home_id: home_id.clone(),
            data: Self::to_wire(record)?,
            version: record.meta.version,
            client_updated_at: record.meta.client_updated_at,
            pending_create: record.meta.pending_create,
            pending_delete: record.meta.pending_delete,
        })
    }

    /// Build a new local record.
    fn apply_create(
        input: Self::Create,
        home_id: &HomeId,
        id: EntityId,
        now: DateTime<Utc>,
    ) -> Record<Self::Fields> {
        Record {
            meta: SyncMeta::new_local(id, home_id.clone(), now),
            fields: Self::create_fields(input, now),
        }
    }

    /// Apply a local update, returning the new record.
    fn apply_update(
        record: &Record<Self::Fields>,
        updates: Self::Update,
        now: DateTime<Utc>,
    ) -> Result<Record<Self::Fields>, LifecycleError> {
        let mut next = record.clone();
        next.meta.mark_updated(now)?;
        Self::update_fields(&mut next.fields, updates, now);
        Ok(next)
    }

    /// Apply a local delete in place.
    fn apply_delete(
        record: &mut Record<Self::Fields>,
        now: DateTime<Utc>,
    ) -> Result<DeleteOutcome, LifecycleError> {
        if !Self::SUPPORTS_SOFT_DELETE && !record.meta.pending_create {
            return Err(LifecycleError::DeleteUnsupported(record.meta.id.clone()));
        }
        record.meta.mark_deleted(now)
    }
}

/// Decode domain fields for `E` from a wire payload.
pub fn decode_fields<E: SyncableEntity>(
    data: &Value,
    entity_id: &EntityId,
) -> Result<E::Fields, MappingError> {
    E::Fields::deserialize(data).map_err(|source| MappingError::Decode {
        entity_id: entity_id.clone(),
        source,
    })
}

/// Validate a wire payload as `E`'s domain fields.
///
/// Usable as a plain `fn` pointer, which is how the registry stores it.
pub fn validate_wire<E: SyncableEntity>(data: &Value) -> Result<(), ValidationError> {
    let fields = E::Fields::deserialize(data)
        .map_err(|err| ValidationError::Malformed(err.to_string()))?;
    E::validate(&fields)
}

/// Reject blank text.
pub fn require_text(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(ValidationError::Empty(field))
    } else {
        Ok(())
    }
}
