//! Typed view of one stored (home, entity type) collection.
//!
//! Stored records are opaque JSON. Decoding splits them into records this
//! partition can work with and everything else: values that do not parse,
//! and records whose `homeId` names another home. The latter are never
//! pushed or merged, but they are written back untouched so a bad record
//! is not silently lost.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use sync_types::{EntityId, HomeId};

use crate::checkpoint::Checkpoint;
use crate::entity::Record;
use crate::mapping::MappingError;
use crate::merge::MergeError;

/// Records of one partition plus its pull cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalCollection<F> {
    home_id: HomeId,
    records: Vec<Record<F>>,
    untouched: Vec<Value>,
    /// Pull cursor stored with the collection
    pub checkpoint: Checkpoint,
}

impl<F> LocalCollection<F> {
    /// An empty collection.
    pub fn empty(home_id: HomeId) -> Self {
        Self {
            home_id,
            records: Vec::new(),
            untouched: Vec::new(),
            checkpoint: Checkpoint::default(),
        }
    }

    /// Partition this collection belongs to.
    pub fn home_id(&self) -> &HomeId {
        &self.home_id
    }

    /// All decoded records, tombstones included.
    pub fn records(&self) -> &[Record<F>] {
        &self.records
    }

    /// Records that are not tombstones.
    pub fn live(&self) -> impl Iterator<Item = &Record<F>> {
        self.records.iter().filter(|r| !r.meta.is_tombstone())
    }

    /// Records with a pending mutation.
    pub fn pending(&self) -> impl Iterator<Item = &Record<F>> {
        self.records.iter().filter(|r| r.meta.is_pending())
    }

    /// Number of stored values that could not be used.
    pub fn untouched_len(&self) -> usize {
        self.untouched.len()
    }

    /// Look up a record by id.
    pub fn get(&self, id: &EntityId) -> Option<&Record<F>> {
        self.records.iter().find(|r| r.id() == id)
    }

    /// Look up a record by id for mutation.
    pub fn get_mut(&mut self, id: &EntityId) -> Option<&mut Record<F>> {
        self.records.iter_mut().find(|r| r.id() == id)
    }

    /// True if a record with this id exists, tombstone or not.
    pub fn contains(&self, id: &EntityId) -> bool {
        self.get(id).is_some()
    }

    /// Insert or replace a record by id.
    pub fn upsert(&mut self, record: Record<F>) {
        match self.get_mut(record.id()) {
            Some(slot) => *slot = record,
            None => self.records.push(record),
        }
    }

    /// Drop a record from storage entirely.
    pub fn remove(&mut self, id: &EntityId) -> Option<Record<F>> {
        let index = self.records.iter().position(|r| r.id() == id)?;
        Some(self.records.remove(index))
    }
}

impl<F: Serialize + DeserializeOwned> LocalCollection<F> {
    /// Decode stored values.
    ///
    /// Returns the collection and one error per value set aside.
    pub fn decode(
        home_id: HomeId,
        values: Vec<Value>,
        checkpoint: Checkpoint,
    ) -> (Self, Vec<MergeError>) {
        let mut collection = Self {
            checkpoint,
            ..Self::empty(home_id)
        };
        let mut issues = Vec::new();

        for value in values {
            match Record::<F>::deserialize_value(&value) {
                Ok(record) if record.meta.home_id == collection.home_id => {
                    collection.records.push(record);
                }
                Ok(record) => {
                    issues.push(MergeError::ForeignHome {
                        id: record.meta.id,
                        expected: collection.home_id.clone(),
                        found: record.meta.home_id,
                    });
                    collection.untouched.push(value);
                }
                Err(err) => {
                    issues.push(MergeError::Mapping(err));
                    collection.untouched.push(value);
                }
            }
        }

        (collection, issues)
    }

    /// Encode back to stored values: decoded records first, then the
    /// values that were set aside, unchanged.
    pub fn encode(&self) -> Result<Vec<Value>, MappingError> {
        let mut values = Vec::with_capacity(self.records.len() + self.untouched.len());
        for record in &self.records {
            let value = serde_json::to_value(record).map_err(|source| MappingError::Encode {
                entity_id: record.meta.id.clone(),
                source,
            })?;
            values.push(value);
        }
        values.extend(self.untouched.iter().cloned());
        Ok(values)
    }
}

impl<F: DeserializeOwned> Record<F> {
    fn deserialize_value(value: &Value) -> Result<Self, MappingError> {
        serde_json::from_value(value.clone()).map_err(|source| MappingError::Decode {
            entity_id: EntityId::new(
                value
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or("<unknown>"),
            ),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::SyncableEntity;
    use crate::model::{NewTodo, TodoEntity, TodoFields};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn todo(id: &str, home: &str) -> Value {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let record = TodoEntity::apply_create(
            NewTodo::text("water plants"),
            &HomeId::new(home),
            EntityId::new(id),
            now,
        );
        serde_json::to_value(record).unwrap()
    }

    #[test]
    fn decode_splits_foreign_and_malformed() {
        let values = vec![
            todo("a1", "h1"),
            todo("a2", "h2"),
            json!({"id": "a3", "garbage": true}),
        ];

        let (collection, issues) =
            LocalCollection::<TodoFields>::decode(HomeId::new("h1"), values, Checkpoint::default());

        assert_eq!(collection.records().len(), 1);
        assert_eq!(collection.untouched_len(), 2);
        assert_eq!(issues.len(), 2);
        assert!(matches!(issues[0], MergeError::ForeignHome { .. }));
        assert!(matches!(
            &issues[1],
            MergeError::Mapping(MappingError::Decode { entity_id, .. }) if entity_id.as_str() == "a3"
        ));
    }

    #[test]
    fn encode_writes_untouched_values_back() {
        let bad = json!({"id": "a3", "garbage": true});
        let values = vec![todo("a1", "h1"), bad.clone()];

        let (collection, _) =
            LocalCollection::<TodoFields>::decode(HomeId::new("h1"), values, Checkpoint::default());
        let encoded = collection.encode().unwrap();

        assert_eq!(encoded.len(), 2);
        assert_eq!(encoded[0]["id"], "a1");
        assert_eq!(encoded[1], bad);
    }

    #[test]
    fn live_excludes_tombstones() {
        let (mut collection, _) = LocalCollection::<TodoFields>::decode(
            HomeId::new("h1"),
            vec![todo("a1", "h1"), todo("a2", "h1")],
            Checkpoint::default(),
        );
        let now = Utc.with_ymd_and_hms(2024, 3, 2, 9, 0, 0).unwrap();
        collection.get_mut(&EntityId::new("a2")).unwrap().meta.deleted_at = Some(now);

        let live: Vec<_> = collection.live().map(|r| r.id().as_str()).collect();
        assert_eq!(live, vec!["a1"]);
        assert_eq!(collection.records().len(), 2);
    }

    #[test]
    fn upsert_and_remove() {
        let mut collection = LocalCollection::<TodoFields>::empty(HomeId::new("h1"));
        let (seed, _) = LocalCollection::<TodoFields>::decode(
            HomeId::new("h1"),
            vec![todo("a1", "h1")],
            Checkpoint::default(),
        );
        let record = seed.records()[0].clone();

        collection.upsert(record.clone());
        collection.upsert(record);
        assert_eq!(collection.records().len(), 1);

        assert!(collection.remove(&EntityId::new("a1")).is_some());
        assert!(!collection.contains(&EntityId::new("a1")));
    }
}
