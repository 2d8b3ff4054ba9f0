//! Per-cycle change sets.
//!
//! The engine feeds every observable effect of a cycle into a
//! [`DeltaAccumulator`]; observers receive the finished [`SyncDelta`] and
//! apply its [`patches`](SyncDelta::patches) in order.

use chrono::{DateTime, Utc};
use sync_types::{EntityId, EntityType};

/// Anything carrying an entity id.
pub trait Keyed {
    /// The entity id.
    fn key(&self) -> &EntityId;
}

/// Outcome of one sync for one (home, entity type) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncDelta<T> {
    /// Collection the delta belongs to
    pub entity_type: EntityType,
    /// Records that appeared locally
    pub created: Vec<T>,
    /// Records whose local value changed
    pub updated: Vec<T>,
    /// Records that became tombstones
    pub deleted: Vec<EntityId>,
    /// Pending mutations the server confirmed
    pub confirmed: Vec<EntityId>,
    /// Ids rewritten to a server-suggested id, as (old, new)
    pub remapped: Vec<(EntityId, EntityId)>,
    /// Response timestamp, absent when no response was applied
    pub server_timestamp: Option<DateTime<Utc>>,
}

/// One change for an observer to apply.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Patch<'a, T> {
    /// Insert
    Created(&'a T),
    /// Replace
    Updated(&'a T),
    /// Remove
    Deleted(&'a EntityId),
}

impl<T> SyncDelta<T> {
    /// A delta with nothing in it.
    pub fn empty(entity_type: EntityType) -> Self {
        Self {
            entity_type,
            created: Vec::new(),
            updated: Vec::new(),
            deleted: Vec::new(),
            confirmed: Vec::new(),
            remapped: Vec::new(),
            server_timestamp: None,
        }
    }

    /// True when no record changed locally.
    ///
    /// Confirmations alone do not count as a change.
    pub fn unchanged(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    /// Changes in apply order: created, then updated, then deleted.
    pub fn patches(&self) -> impl Iterator<Item = Patch<'_, T>> {
        self.created
            .iter()
            .map(Patch::Created)
            .chain(self.updated.iter().map(Patch::Updated))
            .chain(self.deleted.iter().map(Patch::Deleted))
    }

    /// Convert the carried records, failing on the first error.
    pub fn try_map<U, E>(self, mut f: impl FnMut(T) -> Result<U, E>) -> Result<SyncDelta<U>, E> {
        Ok(SyncDelta {
            entity_type: self.entity_type,
            created: self.created.into_iter().map(&mut f).collect::<Result<_, _>>()?,
            updated: self.updated.into_iter().map(&mut f).collect::<Result<_, _>>()?,
            deleted: self.deleted,
            confirmed: self.confirmed,
            remapped: self.remapped,
            server_timestamp: self.server_timestamp,
        })
    }
}

/// Collects cycle effects into a [`SyncDelta`].
///
/// Each id is reported at most once per set. A record created and then
/// updated in the same cycle stays in `created` with its latest value.
#[derive(Debug, Clone)]
pub struct DeltaAccumulator<T> {
    delta: SyncDelta<T>,
}

impl<T: Keyed> DeltaAccumulator<T> {
    /// Start accumulating for one collection.
    pub fn new(entity_type: EntityType) -> Self {
        Self {
            delta: SyncDelta::empty(entity_type),
        }
    }

    /// A record appeared locally.
    pub fn record_created(&mut self, record: T) {
        upsert(&mut self.delta.created, record);
    }

    /// A record's local value changed.
    pub fn record_updated(&mut self, record: T) {
        if let Some(slot) = find(&mut self.delta.created, record.key()) {
            *slot = record;
            return;
        }
        upsert(&mut self.delta.updated, record);
    }

    /// A record became a tombstone.
    pub fn record_deleted(&mut self, id: EntityId) {
        if !self.delta.deleted.contains(&id) {
            self.delta.deleted.push(id);
        }
    }

    /// The server confirmed a pending mutation.
    pub fn record_confirmed(&mut self, id: EntityId) {
        if !self.delta.confirmed.contains(&id) {
            self.delta.confirmed.push(id);
        }
    }

    /// A record's id was rewritten.
    pub fn record_remapped(&mut self, old: EntityId, new: EntityId) {
        self.delta.remapped.push((old, new));
    }

    /// Nothing observable has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.delta.unchanged() && self.delta.confirmed.is_empty() && self.delta.remapped.is_empty()
    }

    /// Finish with the response timestamp.
    pub fn finish(mut self, server_timestamp: DateTime<Utc>) -> SyncDelta<T> {
        self.delta.server_timestamp = Some(server_timestamp);
        self.delta
    }
}

fn find<'a, T: Keyed>(records: &'a mut [T], id: &EntityId) -> Option<&'a mut T> {
    records.iter_mut().find(|r| r.key() == id)
}

fn upsert<T: Keyed>(records: &mut Vec<T>, record: T) {
    match find(records, record.key()) {
        Some(slot) => *slot = record,
        None => records.push(record),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[derive(Debug, Clone, PartialEq)]
    struct Item {
        id: EntityId,
        label: &'static str,
    }

    impl Keyed for Item {
        fn key(&self) -> &EntityId {
            &self.id
        }
    }

    fn item(id: &str, label: &'static str) -> Item {
        Item {
            id: EntityId::new(id),
            label,
        }
    }

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn empty_delta_is_unchanged() {
        let delta = DeltaAccumulator::<Item>::new(EntityType::Todos).finish(ts());
        assert!(delta.unchanged());
        assert_eq!(delta.server_timestamp, Some(ts()));
        assert_eq!(delta.patches().count(), 0);
    }

    #[test]
    fn confirmations_alone_are_unchanged() {
        let mut acc = DeltaAccumulator::<Item>::new(EntityType::Todos);
        acc.record_confirmed(EntityId::new("a1"));
        assert!(!acc.is_empty());

        let delta = acc.finish(ts());
        assert!(delta.unchanged());
        assert_eq!(delta.confirmed, vec![EntityId::new("a1")]);
    }

    #[test]
    fn created_then_updated_reports_created_once() {
        let mut acc = DeltaAccumulator::new(EntityType::Todos);
        acc.record_created(item("a1", "first"));
        acc.record_updated(item("a1", "second"));

        let delta = acc.finish(ts());
        assert_eq!(delta.created, vec![item("a1", "second")]);
        assert!(delta.updated.is_empty());
    }

    #[test]
    fn repeated_updates_keep_latest() {
        let mut acc = DeltaAccumulator::new(EntityType::Todos);
        acc.record_updated(item("a1", "first"));
        acc.record_updated(item("a1", "second"));

        let delta = acc.finish(ts());
        assert_eq!(delta.updated, vec![item("a1", "second")]);
    }

    #[test]
    fn patches_apply_in_order() {
        let mut acc = DeltaAccumulator::new(EntityType::Todos);
        acc.record_deleted(EntityId::new("d1"));
        acc.record_updated(item("u1", "u"));
        acc.record_created(item("c1", "c"));

        let delta = acc.finish(ts());
        let order: Vec<_> = delta
            .patches()
            .map(|p| match p {
                Patch::Created(i) => format!("created:{}", i.id),
                Patch::Updated(i) => format!("updated:{}", i.id),
                Patch::Deleted(id) => format!("deleted:{id}"),
            })
            .collect();
        assert_eq!(order, vec!["created:c1", "updated:u1", "deleted:d1"]);
    }

    #[test]
    fn deleted_ids_are_deduplicated() {
        let mut acc = DeltaAccumulator::<Item>::new(EntityType::Todos);
        acc.record_deleted(EntityId::new("d1"));
        acc.record_deleted(EntityId::new("d1"));
        assert_eq!(acc.finish(ts()).deleted.len(), 1);
    }

    #[test]
    fn try_map_converts_records() {
        let mut acc = DeltaAccumulator::new(EntityType::Todos);
        acc.record_created(item("a1", "x"));
        acc.record_remapped(EntityId::new("old"), EntityId::new("new"));

        let mapped = acc
            .finish(ts())
            .try_map(|i| Ok::<_, ()>(i.label.to_string()))
            .unwrap();
        assert_eq!(mapped.created, vec!["x".to_string()]);
        assert_eq!(mapped.remapped.len(), 1);
    }
}
