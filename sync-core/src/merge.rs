//! Merge rules for one sync round trip.
//!
//! Three pure steps, each working on a [`LocalCollection`] the caller has
//! just read from storage:
//!
//! 1. [`build_push`] selects pending records and encodes them.
//! 2. [`apply_push_outcomes`] folds the server's verdict on each pushed
//!    record back in. The collection must be re-read after the round trip;
//!    the submitted versions detect records mutated while it was in flight.
//! 3. [`apply_pull`] merges remote changes. Records with pending local
//!    mutations are left alone; the next push settles them.
//!
//! Every step reports per-record problems as [`MergeError`]s and carries
//! on with the remaining records.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use sync_types::{
    EntityId, EntityType, HomeId, PendingEnvelope, PullResult, PushOutcome, PushStatus,
};
use thiserror::Error;

use crate::collection::LocalCollection;
use crate::delta::DeltaAccumulator;
use crate::entity::{Record, SyncMeta};
use crate::mapping::{decode_fields, MappingError, SyncableEntity, ValidationError, WireMeta};
use crate::registry::Validator;

/// A per-record problem. Never aborts the surrounding cycle.
#[derive(Debug, Error)]
pub enum MergeError {
    /// Encoding or decoding failed.
    #[error(transparent)]
    Mapping(#[from] MappingError),

    /// A stored record names a different home than its partition.
    #[error("record {id} belongs to home {found}, not {expected}")]
    ForeignHome {
        /// Record id
        id: EntityId,
        /// Partition it was read from
        expected: HomeId,
        /// Home it claims
        found: HomeId,
    },

    /// A pending record failed validation and was not pushed.
    #[error("record {id} failed validation: {source}")]
    Invalid {
        /// Record id
        id: EntityId,
        /// Validation failure
        #[source]
        source: ValidationError,
    },

    /// The server answered for a record that was not submitted or no
    /// longer exists locally.
    #[error("push outcome for unknown record {0}")]
    UnknownRecord(EntityId),

    /// A `server_version` outcome arrived without the server payload.
    #[error("conflict outcome for {0} carries no server data")]
    MissingServerData(EntityId),

    /// The server rejected a record and offered no remediation.
    #[error("server rejected {id}: {reason}")]
    Rejected {
        /// Record id
        id: EntityId,
        /// Code and message from the server
        reason: String,
    },

    /// The server-suggested id is already used locally.
    #[error("cannot rename {old} to {new}: id already in use")]
    RemapConflict {
        /// Current id
        old: EntityId,
        /// Suggested id
        new: EntityId,
    },

    /// Home ids are partition keys and cannot be rewritten in place.
    #[error("home {0} cannot be renamed by the server")]
    HomeRemap(EntityId),
}

/// Push section for one collection.
#[derive(Debug, Default)]
pub struct PushBatch {
    /// Envelopes to send, in collection order
    pub envelopes: Vec<PendingEnvelope>,
    /// Version of each record as submitted
    pub submitted: HashMap<EntityId, u64>,
    /// Pending records left out of the batch
    pub skipped: Vec<MergeError>,
}

impl PushBatch {
    /// True when nothing is to be pushed.
    pub fn is_empty(&self) -> bool {
        self.envelopes.is_empty()
    }

    /// Envelope sent for `id`.
    pub fn envelope(&self, id: &EntityId) -> Option<&PendingEnvelope> {
        self.envelopes.iter().find(|e| &e.entity_id == id)
    }
}

/// Select and encode every pending record.
///
/// Records whose payload fails `validate` are skipped; pending deletes are
/// not validated since their payload is only informational.
pub fn build_push<E: SyncableEntity>(
    collection: &LocalCollection<E::Fields>,
    validate: Validator,
) -> PushBatch {
    let mut batch = PushBatch::default();

    for record in collection.pending() {
        let envelope = match E::to_pending_envelope(record, collection.home_id()) {
            Ok(envelope) => envelope,
            Err(err) => {
                batch.skipped.push(err.into());
                continue;
            }
        };
        if !record.meta.pending_delete {
            if let Err(source) = validate(&envelope.data) {
                batch.skipped.push(MergeError::Invalid {
                    id: record.id().clone(),
                    source,
                });
                continue;
            }
        }
        batch
            .submitted
            .insert(record.id().clone(), record.meta.version);
        batch.envelopes.push(envelope);
    }

    batch
}

/// Apply the server's per-record push verdicts.
pub fn apply_push_outcomes<'a, E: SyncableEntity>(
    collection: &mut LocalCollection<E::Fields>,
    outcomes: impl IntoIterator<Item = &'a PushOutcome>,
    batch: &PushBatch,
    server_timestamp: DateTime<Utc>,
    acc: &mut DeltaAccumulator<Record<E::Fields>>,
) -> Vec<MergeError> {
    let mut issues = Vec::new();
    for outcome in outcomes {
        let result = match batch.submitted.get(&outcome.entity_id) {
            Some(_) if !collection.contains(&outcome.entity_id) => {
                keep_removal::<E>(collection, outcome, batch, server_timestamp, acc)
            }
            Some(&version) => {
                apply_push_outcome::<E>(collection, outcome, version, server_timestamp, acc)
            }
            None => Err(MergeError::UnknownRecord(outcome.entity_id.clone())),
        };
        if let Err(err) = result {
            issues.push(err);
        }
    }
    issues
}

fn apply_push_outcome<E: SyncableEntity>(
    collection: &mut LocalCollection<E::Fields>,
    outcome: &PushOutcome,
    submitted_version: u64,
    server_timestamp: DateTime<Utc>,
    acc: &mut DeltaAccumulator<Record<E::Fields>>,
) -> Result<(), MergeError> {
    let id = &outcome.entity_id;
    let record = collection
        .get_mut(id)
        .ok_or_else(|| MergeError::UnknownRecord(id.clone()))?;
    // Mutated locally after the batch was built: the newer change must
    // survive this merge and go out with the next push.
    let raced = record.meta.version > submitted_version;
    let meta = &mut record.meta;

    match outcome.status {
        PushStatus::Created | PushStatus::Updated => {
            meta.server_updated_at = Some(outcome.server_updated_at.unwrap_or(server_timestamp));
            meta.last_synced_at = Some(server_timestamp);
            if raced {
                if meta.pending_create {
                    meta.pending_create = false;
                    meta.pending_update = true;
                }
            } else {
                meta.pending_create = false;
                meta.pending_update = false;
                meta.pending_delete = false;
                if outcome.status == PushStatus::Created {
                    if let Some(version) = outcome.server_version {
                        meta.version = version;
                    }
                }
            }
            acc.record_confirmed(id.clone());
        }
        PushStatus::ServerVersion => {
            if raced {
                return Ok(());
            }
            let data = outcome
                .server_version_data
                .as_ref()
                .ok_or_else(|| MergeError::MissingServerData(id.clone()))?;
            let fields = decode_fields::<E>(data, id)?;
            let accepted_at = outcome.server_updated_at.unwrap_or(server_timestamp);

            record.fields = fields;
            let meta = &mut record.meta;
            if let Some(version) = outcome.server_version {
                meta.version = version;
            }
            meta.pending_create = false;
            meta.pending_update = false;
            meta.pending_delete = false;
            meta.deleted_at = None;
            meta.updated_at = accepted_at;
            meta.server_updated_at = Some(accepted_at);
            meta.last_synced_at = Some(server_timestamp);

            acc.record_updated(record.clone());
            acc.record_confirmed(id.clone());
        }
        PushStatus::Deleted => {
            meta.pending_delete = false;
            meta.deleted_at.get_or_insert(server_timestamp);
            meta.last_synced_at = Some(server_timestamp);
            acc.record_confirmed(id.clone());
        }
        PushStatus::Error => return apply_rejection::<E>(collection, outcome, acc),
    }
    Ok(())
}

/// The record was removed locally while its push was in flight.
///
/// If the server stored it, a pending tombstone takes its place so the
/// removal is pushed next cycle and the pull does not bring it back.
/// Types without tombstones cannot be deleted once synced; the server copy
/// is restored instead.
fn keep_removal<E: SyncableEntity>(
    collection: &mut LocalCollection<E::Fields>,
    outcome: &PushOutcome,
    batch: &PushBatch,
    server_timestamp: DateTime<Utc>,
    acc: &mut DeltaAccumulator<Record<E::Fields>>,
) -> Result<(), MergeError> {
    let id = &outcome.entity_id;
    if !matches!(outcome.status, PushStatus::Created | PushStatus::Updated) {
        return Err(MergeError::UnknownRecord(id.clone()));
    }
    let envelope = batch
        .envelope(id)
        .ok_or_else(|| MergeError::UnknownRecord(id.clone()))?;
    let fields = decode_fields::<E>(&envelope.data, id)?;

    let mut meta = SyncMeta::new_local(
        id.clone(),
        collection.home_id().clone(),
        envelope.client_updated_at,
    );
    meta.server_updated_at = Some(outcome.server_updated_at.unwrap_or(server_timestamp));
    meta.last_synced_at = Some(server_timestamp);
    meta.pending_create = false;

    if !E::SUPPORTS_SOFT_DELETE {
        meta.version = outcome.server_version.unwrap_or(envelope.version);
        let record = Record { meta, fields };
        collection.upsert(record.clone());
        acc.record_created(record);
        acc.record_confirmed(id.clone());
        return Ok(());
    }

    meta.version = envelope.version + 1;
    meta.updated_at = server_timestamp;
    meta.pending_delete = true;
    meta.deleted_at = Some(server_timestamp);
    collection.upsert(Record { meta, fields });
    Ok(())
}

/// Handle an `error` outcome. The record stays pending either way.
fn apply_rejection<E: SyncableEntity>(
    collection: &mut LocalCollection<E::Fields>,
    outcome: &PushOutcome,
    acc: &mut DeltaAccumulator<Record<E::Fields>>,
) -> Result<(), MergeError> {
    let old = &outcome.entity_id;
    if !collection.contains(old) {
        return Err(MergeError::UnknownRecord(old.clone()));
    }

    let new = match outcome.suggested_home_id.as_deref() {
        Some(suggested) if suggested != old.as_str() => EntityId::new(suggested),
        _ => {
            let reason = match (&outcome.code, &outcome.message) {
                (Some(code), Some(message)) => format!("{code}: {message}"),
                (Some(code), None) => code.clone(),
                (None, Some(message)) => message.clone(),
                (None, None) => "no reason given".to_string(),
            };
            return Err(MergeError::Rejected {
                id: old.clone(),
                reason,
            });
        }
    };

    if E::ENTITY_TYPE == EntityType::Homes {
        return Err(MergeError::HomeRemap(old.clone()));
    }
    if collection.contains(&new) {
        return Err(MergeError::RemapConflict {
            old: old.clone(),
            new,
        });
    }

    if let Some(record) = collection.get_mut(old) {
        record.meta.id = new.clone();
    }
    acc.record_remapped(old.clone(), new);
    Ok(())
}

/// Merge one pull result into the collection.
pub fn apply_pull<E: SyncableEntity>(
    collection: &mut LocalCollection<E::Fields>,
    pull: &PullResult,
    server_timestamp: DateTime<Utc>,
    acc: &mut DeltaAccumulator<Record<E::Fields>>,
) -> Vec<MergeError> {
    let mut issues = Vec::new();

    for wire in &pull.entities {
        let meta = WireMeta {
            entity_id: wire.entity_id.clone(),
            home_id: collection.home_id().clone(),
            version: wire.version,
            updated_at: wire.updated_at,
            client_updated_at: wire.client_updated_at,
            server_timestamp,
        };
        let mut incoming = match E::from_wire(&wire.data, &meta) {
            Ok(record) => record,
            Err(err) => {
                issues.push(err.into());
                continue;
            }
        };

        match collection.get_mut(&wire.entity_id) {
            None => {
                collection.upsert(incoming.clone());
                acc.record_created(incoming);
            }
            Some(existing) if existing.meta.is_pending() => {}
            Some(existing) => {
                let same = existing.meta.version == incoming.meta.version
                    && existing.fields == incoming.fields
                    && !existing.meta.is_tombstone();
                if same {
                    existing.meta.last_synced_at = Some(server_timestamp);
                    continue;
                }
                incoming.meta.created_at = existing.meta.created_at;
                *existing = incoming.clone();
                acc.record_updated(incoming);
            }
        }
    }

    for id in &pull.deleted_entity_ids {
        let Some(existing) = collection.get_mut(id) else {
            continue;
        };
        let meta = &mut existing.meta;
        if meta.is_tombstone() && !meta.pending_delete {
            continue;
        }
        meta.deleted_at.get_or_insert(server_timestamp);
        meta.pending_create = false;
        meta.pending_update = false;
        meta.pending_delete = false;
        meta.last_synced_at = Some(server_timestamp);
        acc.record_deleted(id.clone());
    }

    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::Checkpoint;
    use crate::mapping::validate_wire;
    use crate::model::{NewTodo, TodoEntity, TodoFields, TodoUpdate};
    use chrono::TimeZone;
    use serde_json::json;
    use sync_types::WireEntity;

    type Todos = LocalCollection<TodoFields>;

    fn ts(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, minute, 0).unwrap()
    }

    fn home() -> HomeId {
        HomeId::new("h1")
    }

    fn acc() -> DeltaAccumulator<Record<TodoFields>> {
        DeltaAccumulator::new(EntityType::Todos)
    }

    fn created(id: &str, text: &str) -> Record<TodoFields> {
        TodoEntity::apply_create(NewTodo::text(text), &home(), EntityId::new(id), ts(0))
    }

    fn synced(id: &str, text: &str, version: u64) -> Record<TodoFields> {
        let mut record = created(id, text);
        record.meta.pending_create = false;
        record.meta.version = version;
        record.meta.server_updated_at = Some(ts(0));
        record
    }

    fn collection(records: Vec<Record<TodoFields>>) -> Todos {
        let mut collection = Todos::empty(home());
        for record in records {
            collection.upsert(record);
        }
        collection
    }

    fn outcome(id: &str, status: PushStatus) -> PushOutcome {
        PushOutcome::new(EntityId::new(id), status)
    }

    fn submitted(pairs: &[(&str, u64)]) -> PushBatch {
        PushBatch {
            submitted: pairs
                .iter()
                .map(|(id, v)| (EntityId::new(*id), *v))
                .collect(),
            ..PushBatch::default()
        }
    }

    fn wire(id: &str, text: &str, version: u64) -> WireEntity {
        WireEntity {
            entity_id: EntityId::new(id),
            data: json!({"text": text, "completed": false, "position": 0}),
            version,
            client_updated_at: ts(1),
            updated_at: ts(2),
        }
    }

    fn pull(entities: Vec<WireEntity>, deleted: &[&str]) -> PullResult {
        PullResult {
            entity_type: EntityType::Todos,
            entities,
            deleted_entity_ids: deleted.iter().map(|id| EntityId::new(*id)).collect(),
            checkpoint: None,
        }
    }

    // ===========================================
    // Push batch
    // ===========================================

    #[test]
    fn push_batch_selects_pending_only() {
        let todos = collection(vec![created("a1", "new"), synced("a2", "old", 3)]);

        let batch = build_push::<TodoEntity>(&todos, validate_wire::<TodoEntity>);

        assert_eq!(batch.envelopes.len(), 1);
        assert_eq!(batch.envelopes[0].entity_id, EntityId::new("a1"));
        assert_eq!(batch.submitted.get(&EntityId::new("a1")), Some(&1));
        assert!(batch.skipped.is_empty());
    }

    #[test]
    fn push_batch_is_empty_without_pending_records() {
        let todos = collection(vec![synced("a1", "old", 1)]);
        assert!(build_push::<TodoEntity>(&todos, validate_wire::<TodoEntity>).is_empty());
    }

    #[test]
    fn invalid_record_is_skipped_and_siblings_proceed() {
        let todos = collection(vec![created("a1", ""), created("a2", "fine")]);

        let batch = build_push::<TodoEntity>(&todos, validate_wire::<TodoEntity>);

        assert_eq!(batch.envelopes.len(), 1);
        assert_eq!(batch.envelopes[0].entity_id, EntityId::new("a2"));
        assert!(matches!(batch.skipped[0], MergeError::Invalid { .. }));
    }

    #[test]
    fn pending_delete_skips_validation() {
        let mut record = synced("a1", "", 1);
        record.meta.mark_deleted(ts(1)).unwrap();
        let todos = collection(vec![record]);

        let batch = build_push::<TodoEntity>(&todos, validate_wire::<TodoEntity>);
        assert_eq!(batch.envelopes.len(), 1);
        assert!(batch.envelopes[0].pending_delete);
    }

    // ===========================================
    // Push outcomes
    // ===========================================

    #[test]
    fn updated_outcome_clears_pending_and_keeps_version() {
        let mut record = synced("a1", "milk", 1);
        record.meta.pending_update = true;
        let mut todos = collection(vec![record]);
        let mut acc = acc();

        let mut o = outcome("a1", PushStatus::Updated);
        o.server_updated_at = Some(ts(5));
        let issues = apply_push_outcomes::<TodoEntity>(
            &mut todos,
            [&o],
            &submitted(&[("a1", 1)]),
            ts(6),
            &mut acc,
        );

        assert!(issues.is_empty());
        let record = todos.get(&EntityId::new("a1")).unwrap();
        assert!(!record.meta.pending_update);
        assert_eq!(record.meta.server_updated_at, Some(ts(5)));
        assert_eq!(record.meta.version, 1);

        let delta = acc.finish(ts(6));
        assert!(delta.unchanged());
        assert_eq!(delta.confirmed, vec![EntityId::new("a1")]);
    }

    #[test]
    fn created_outcome_adopts_server_version() {
        let mut todos = collection(vec![created("a1", "milk")]);
        let mut o = outcome("a1", PushStatus::Created);
        o.server_version = Some(4);

        apply_push_outcomes::<TodoEntity>(
            &mut todos,
            [&o],
            &submitted(&[("a1", 1)]),
            ts(6),
            &mut acc(),
        );

        let record = todos.get(&EntityId::new("a1")).unwrap();
        assert!(!record.meta.pending_create);
        assert_eq!(record.meta.version, 4);
    }

    #[test]
    fn mutation_during_flight_stays_pending() {
        let mut todos = collection(vec![created("a1", "milk")]);
        let update = TodoUpdate {
            text: Some("oat milk".into()),
            ..Default::default()
        };
        let edited = TodoEntity::apply_update(todos.get(&EntityId::new("a1")).unwrap(), update, ts(1))
            .unwrap();
        todos.upsert(edited);

        let mut o = outcome("a1", PushStatus::Created);
        o.server_version = Some(1);
        apply_push_outcomes::<TodoEntity>(
            &mut todos,
            [&o],
            &submitted(&[("a1", 1)]),
            ts(6),
            &mut acc(),
        );

        let record = todos.get(&EntityId::new("a1")).unwrap();
        assert!(!record.meta.pending_create);
        assert!(record.meta.pending_update);
        assert_eq!(record.meta.version, 2);
        assert_eq!(record.fields.text, "oat milk");
    }

    #[test]
    fn server_version_overwrites_local() {
        let mut record = synced("a1", "mine", 5);
        record.meta.pending_update = true;
        let mut todos = collection(vec![record]);
        let mut acc = acc();

        let mut o = outcome("a1", PushStatus::ServerVersion);
        o.server_version = Some(6);
        o.server_version_data = Some(json!({"text": "theirs", "completed": true, "position": 2}));
        apply_push_outcomes::<TodoEntity>(
            &mut todos,
            [&o],
            &submitted(&[("a1", 5)]),
            ts(6),
            &mut acc,
        );

        let record = todos.get(&EntityId::new("a1")).unwrap();
        assert_eq!(record.fields.text, "theirs");
        assert!(record.fields.completed);
        assert_eq!(record.meta.version, 6);
        assert!(!record.meta.pending_update);

        let delta = acc.finish(ts(6));
        assert_eq!(delta.updated.len(), 1);
        assert_eq!(delta.confirmed, vec![EntityId::new("a1")]);
    }

    #[test]
    fn server_version_without_payload_is_isolated() {
        let mut record = synced("a1", "mine", 5);
        record.meta.pending_update = true;
        let mut todos = collection(vec![record, created("a2", "other")]);

        let conflict = outcome("a1", PushStatus::ServerVersion);
        let ok = outcome("a2", PushStatus::Created);
        let issues = apply_push_outcomes::<TodoEntity>(
            &mut todos,
            [&conflict, &ok],
            &submitted(&[("a1", 5), ("a2", 1)]),
            ts(6),
            &mut acc(),
        );

        assert_eq!(issues.len(), 1);
        assert!(matches!(issues[0], MergeError::MissingServerData(_)));
        assert!(todos.get(&EntityId::new("a1")).unwrap().meta.pending_update);
        assert!(!todos.get(&EntityId::new("a2")).unwrap().meta.pending_create);
    }

    #[test]
    fn deleted_outcome_keeps_tombstone() {
        let mut record = synced("a1", "milk", 1);
        record.meta.mark_deleted(ts(1)).unwrap();
        let mut todos = collection(vec![record]);

        apply_push_outcomes::<TodoEntity>(
            &mut todos,
            [&outcome("a1", PushStatus::Deleted)],
            &submitted(&[("a1", 2)]),
            ts(6),
            &mut acc(),
        );

        let record = todos.get(&EntityId::new("a1")).unwrap();
        assert!(!record.meta.pending_delete);
        assert!(record.meta.is_tombstone());
        assert_eq!(todos.live().count(), 0);
    }

    #[test]
    fn error_outcome_adopts_suggested_id_and_stays_pending() {
        let mut todos = collection(vec![created("a1", "milk")]);
        let mut acc = acc();

        let mut o = outcome("a1", PushStatus::Error);
        o.code = Some("ID_COLLISION".into());
        o.suggested_home_id = Some("a1-x".into());
        let issues = apply_push_outcomes::<TodoEntity>(
            &mut todos,
            [&o],
            &submitted(&[("a1", 1)]),
            ts(6),
            &mut acc,
        );

        assert!(issues.is_empty());
        assert!(!todos.contains(&EntityId::new("a1")));
        let record = todos.get(&EntityId::new("a1-x")).unwrap();
        assert!(record.meta.pending_create);

        let delta = acc.finish(ts(6));
        assert_eq!(
            delta.remapped,
            vec![(EntityId::new("a1"), EntityId::new("a1-x"))]
        );
    }

    #[test]
    fn error_outcome_without_remedy_is_reported() {
        let mut todos = collection(vec![created("a1", "milk")]);

        let mut o = outcome("a1", PushStatus::Error);
        o.code = Some("FORBIDDEN".into());
        o.message = Some("read-only member".into());
        let issues = apply_push_outcomes::<TodoEntity>(
            &mut todos,
            [&o],
            &submitted(&[("a1", 1)]),
            ts(6),
            &mut acc(),
        );

        assert!(matches!(
            &issues[0],
            MergeError::Rejected { reason, .. } if reason == "FORBIDDEN: read-only member"
        ));
        assert!(todos.get(&EntityId::new("a1")).unwrap().meta.pending_create);
    }

    #[test]
    fn outcome_for_unsubmitted_record_is_reported() {
        let mut todos = collection(vec![created("a1", "milk")]);
        let issues = apply_push_outcomes::<TodoEntity>(
            &mut todos,
            [&outcome("zz", PushStatus::Created)],
            &submitted(&[("a1", 1)]),
            ts(6),
            &mut acc(),
        );
        assert!(matches!(issues[0], MergeError::UnknownRecord(_)));
    }

    #[test]
    fn create_removed_during_flight_becomes_pending_tombstone() {
        let mut todos = collection(vec![created("a1", "milk")]);
        let batch = build_push::<TodoEntity>(&todos, validate_wire::<TodoEntity>);
        todos.remove(&EntityId::new("a1"));
        let mut acc = acc();

        let mut o = outcome("a1", PushStatus::Created);
        o.server_version = Some(1);
        let issues = apply_push_outcomes::<TodoEntity>(&mut todos, [&o], &batch, ts(6), &mut acc);

        assert!(issues.is_empty());
        assert_eq!(todos.live().count(), 0);
        let record = todos.get(&EntityId::new("a1")).unwrap();
        assert!(record.meta.pending_delete);
        assert!(!record.meta.pending_create);
        assert_eq!(record.meta.version, 2);
        assert_eq!(record.fields.text, "milk");

        // The server still lists it as live; the pull must not revive it
        apply_pull::<TodoEntity>(&mut todos, &pull(vec![wire("a1", "milk", 1)], &[]), ts(6), &mut acc);
        assert_eq!(todos.live().count(), 0);
        assert!(acc.finish(ts(6)).unchanged());

        let next = build_push::<TodoEntity>(&todos, validate_wire::<TodoEntity>);
        assert_eq!(next.envelopes.len(), 1);
        assert!(next.envelopes[0].pending_delete);
    }

    #[test]
    fn settings_removed_during_flight_are_restored() {
        use crate::model::{SettingsEntity, SettingsFields};

        let mut settings = LocalCollection::<SettingsFields>::empty(home());
        settings.upsert(SettingsEntity::apply_create(
            SettingsFields::default(),
            &home(),
            EntityId::new("s1"),
            ts(0),
        ));
        let batch = build_push::<SettingsEntity>(&settings, validate_wire::<SettingsEntity>);
        settings.remove(&EntityId::new("s1"));
        let mut acc = DeltaAccumulator::new(EntityType::Settings);

        let mut o = outcome("s1", PushStatus::Created);
        o.server_version = Some(1);
        let issues =
            apply_push_outcomes::<SettingsEntity>(&mut settings, [&o], &batch, ts(6), &mut acc);

        assert!(issues.is_empty());
        let record = settings.get(&EntityId::new("s1")).unwrap();
        assert!(!record.meta.is_pending());
        assert!(!record.meta.is_tombstone());
        assert_eq!(acc.finish(ts(6)).created.len(), 1);
    }

    #[test]
    fn rejected_create_removed_during_flight_is_dropped() {
        let mut todos = collection(vec![created("a1", "milk")]);
        let batch = build_push::<TodoEntity>(&todos, validate_wire::<TodoEntity>);
        todos.remove(&EntityId::new("a1"));

        let mut o = outcome("a1", PushStatus::Error);
        o.code = Some("HOME_NOT_FOUND".into());
        let issues = apply_push_outcomes::<TodoEntity>(&mut todos, [&o], &batch, ts(6), &mut acc());

        assert!(matches!(issues[0], MergeError::UnknownRecord(_)));
        assert!(!todos.contains(&EntityId::new("a1")));
    }

    #[test]
    fn concrete_update_confirmation() {
        let mut record = synced("a1", "milk", 1);
        record.meta.pending_update = true;
        let mut todos = collection(vec![record]);
        let stamp: DateTime<Utc> = "2024-03-01T10:00:00Z".parse().unwrap();

        let o: PushOutcome = serde_json::from_value(json!({
            "entityId": "a1",
            "status": "updated",
            "serverUpdatedAt": "2024-03-01T10:00:00Z"
        }))
        .unwrap();
        apply_push_outcomes::<TodoEntity>(
            &mut todos,
            [&o],
            &submitted(&[("a1", 1)]),
            ts(30),
            &mut acc(),
        );

        let record = todos.get(&EntityId::new("a1")).unwrap();
        assert!(!record.meta.pending_update);
        assert_eq!(record.meta.server_updated_at, Some(stamp));
        assert_eq!(record.meta.version, 1);
    }

    // ===========================================
    // Pull
    // ===========================================

    #[test]
    fn pull_creates_absent_records() {
        let mut todos = Todos::empty(home());
        let mut acc = acc();

        let issues = apply_pull::<TodoEntity>(&mut todos, &pull(vec![wire("b1", "tea", 3)], &[]), ts(9), &mut acc);

        assert!(issues.is_empty());
        let record = todos.get(&EntityId::new("b1")).unwrap();
        assert_eq!(record.meta.version, 3);
        assert_eq!(record.home_id(), &home());
        assert_eq!(acc.finish(ts(9)).created.len(), 1);
    }

    #[test]
    fn pull_overwrites_clean_records() {
        let mut todos = collection(vec![synced("b1", "tea", 1)]);
        let mut acc = acc();

        apply_pull::<TodoEntity>(&mut todos, &pull(vec![wire("b1", "green tea", 2)], &[]), ts(9), &mut acc);

        let record = todos.get(&EntityId::new("b1")).unwrap();
        assert_eq!(record.fields.text, "green tea");
        assert_eq!(record.meta.created_at, ts(0));
        assert_eq!(acc.finish(ts(9)).updated.len(), 1);
    }

    #[test]
    fn pull_skips_pending_records() {
        let mut record = synced("b1", "mine", 1);
        record.meta.pending_update = true;
        let mut todos = collection(vec![record]);
        let mut acc = acc();

        apply_pull::<TodoEntity>(&mut todos, &pull(vec![wire("b1", "theirs", 2)], &[]), ts(9), &mut acc);

        assert_eq!(todos.get(&EntityId::new("b1")).unwrap().fields.text, "mine");
        assert!(acc.finish(ts(9)).unchanged());
    }

    #[test]
    fn pull_of_identical_record_is_unchanged() {
        let mut todos = Todos::empty(home());
        apply_pull::<TodoEntity>(&mut todos, &pull(vec![wire("b1", "tea", 3)], &[]), ts(9), &mut acc());

        let mut again = acc();
        apply_pull::<TodoEntity>(&mut todos, &pull(vec![wire("b1", "tea", 3)], &[]), ts(10), &mut again);
        assert!(again.finish(ts(10)).unchanged());
    }

    #[test]
    fn pull_deletes_tombstone_local_records() {
        let mut todos = collection(vec![synced("b1", "tea", 1), synced("b2", "coffee", 1)]);
        let mut acc = acc();

        apply_pull::<TodoEntity>(&mut todos, &pull(vec![], &["b1", "missing"]), ts(9), &mut acc);

        let record = todos.get(&EntityId::new("b1")).unwrap();
        assert!(record.meta.is_tombstone());
        assert!(!record.meta.pending_delete);
        assert_eq!(acc.finish(ts(9)).deleted, vec![EntityId::new("b1")]);
    }

    #[test]
    fn pull_ignores_already_confirmed_tombstones() {
        let mut record = synced("b1", "tea", 1);
        record.meta.deleted_at = Some(ts(1));
        let mut todos = collection(vec![record]);
        let mut acc = acc();

        apply_pull::<TodoEntity>(&mut todos, &pull(vec![], &["b1"]), ts(9), &mut acc);
        assert!(acc.finish(ts(9)).unchanged());
    }

    #[test]
    fn malformed_pulled_entity_is_isolated() {
        let mut todos = Todos::empty(home());
        let mut bad = wire("b1", "tea", 1);
        bad.data = json!({"nope": 1});

        let issues = apply_pull::<TodoEntity>(
            &mut todos,
            &pull(vec![bad, wire("b2", "coffee", 1)], &[]),
            ts(9),
            &mut acc(),
        );

        assert_eq!(issues.len(), 1);
        assert!(todos.contains(&EntityId::new("b2")));
        assert!(!todos.contains(&EntityId::new("b1")));
    }

    #[test]
    fn checkpoint_is_untouched_by_merge() {
        let mut todos = Todos::empty(home());
        todos.checkpoint = Checkpoint::new(Some(7), None);
        apply_pull::<TodoEntity>(&mut todos, &pull(vec![wire("b1", "tea", 1)], &[]), ts(9), &mut acc());
        assert_eq!(todos.checkpoint.last_pulled_version, 7);
    }
}
