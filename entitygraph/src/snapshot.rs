//! Snapshot & dirty tracker (spec §4.3).
//!
//! Per-instance bookkeeping: the server-confirmed value of each tracked
//! field at last-clean time, plus the set of field names actually observed
//! from a server payload. Dirty detection is strictly field-by-field against
//! a *reduced* encoding — never a full recursive serialization, which would
//! walk into cycles through bidirectional relationships (spec §9).

use std::collections::{HashMap, HashSet};

/// The stable, reduced encoding a tracked field's value is compared against.
///
/// - an entity reference snapshots as its id,
/// - a list of entity references as the list of their ids,
/// - a scalar as itself (`serde_json::Value` for a uniform comparable form),
/// - `Unset` as the sentinel.
#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotValue {
    Unset,
    Null,
    Id(String),
    IdList(Vec<String>),
    Scalar(serde_json::Value),
}

/// Types whose current value can be reduced to a [`SnapshotValue`] for dirty
/// comparison. Implemented by `#[derive(Entity)]`-generated field structs.
pub trait Trackable {
    /// Encodes every tracked field's *current* in-memory value, keyed by
    /// field name. Must include an entry for every tracked field declared in
    /// the entity's schema, even when the value is `Unset`.
    fn encode_tracked_fields(&self) -> HashMap<String, SnapshotValue>;
}

/// Per-instance snapshot + dirty state (spec §4.3).
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    values: HashMap<String, SnapshotValue>,
    /// When true, every tracked field is considered dirty regardless of
    /// `values` — set by `mark_dirty`.
    forced: bool,
    received_fields: HashSet<String>,
}

impl SnapshotValue {
    /// Reduces a scalar tracked field's current value for snapshot
    /// comparison. Used by derive-generated `Trackable` impls.
    pub fn from_field<T: serde::Serialize>(field: &crate::field::FieldValue<T>) -> Self {
        match field {
            crate::field::FieldValue::Unset => SnapshotValue::Unset,
            crate::field::FieldValue::Null => SnapshotValue::Null,
            crate::field::FieldValue::Value(v) => {
                SnapshotValue::Scalar(serde_json::to_value(v).unwrap_or(serde_json::Value::Null))
            }
        }
    }

    /// Reduces a single-valued relationship field to its peer's id.
    pub fn from_entity_field<T: crate::entity::EntityFields>(field: &crate::field::FieldValue<crate::entity::Entity<T>>) -> Self {
        match field {
            crate::field::FieldValue::Unset => SnapshotValue::Unset,
            crate::field::FieldValue::Null => SnapshotValue::Null,
            crate::field::FieldValue::Value(entity) => match entity.id() {
                Some(id) => SnapshotValue::Id(id),
                None => SnapshotValue::Unset,
            },
        }
    }

    /// Reduces a list-valued relationship field to its peers' ids.
    pub fn from_entity_list_field<T: crate::entity::EntityFields>(
        field: &crate::field::FieldValue<Vec<crate::entity::Entity<T>>>,
    ) -> Self {
        match field {
            crate::field::FieldValue::Unset => SnapshotValue::Unset,
            crate::field::FieldValue::Null => SnapshotValue::Null,
            crate::field::FieldValue::Value(entities) => {
                SnapshotValue::IdList(entities.iter().filter_map(|e| e.id()).collect())
            }
        }
    }
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// True iff `field` appeared in some server payload merged into this
    /// instance.
    pub fn has_received(&self, field: &str) -> bool {
        self.received_fields.contains(field)
    }

    pub fn received_fields(&self) -> &HashSet<String> {
        &self.received_fields
    }

    /// Unions `fields` into the received-fields set.
    pub fn mark_received<I, S>(&mut self, fields: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.received_fields.extend(fields.into_iter().map(Into::into));
    }

    /// True iff any tracked field's current encoded value differs from its
    /// stored snapshot value (spec invariant: strictly field-by-field).
    pub fn is_dirty<T: Trackable>(&self, current: &T) -> bool {
        if self.forced {
            return true;
        }
        let current = current.encode_tracked_fields();
        current.iter().any(|(name, value)| {
            let snapshot_value = self.values.get(name).unwrap_or(&SnapshotValue::Unset);
            value != snapshot_value
        })
    }

    /// Returns the changed tracked-field names mapped to their current
    /// encoded value.
    pub fn changed_fields<T: Trackable>(&self, current: &T) -> HashMap<String, SnapshotValue> {
        let current = current.encode_tracked_fields();
        if self.forced {
            return current;
        }
        current
            .into_iter()
            .filter(|(name, value)| {
                let snapshot_value = self.values.get(name).unwrap_or(&SnapshotValue::Unset);
                value != snapshot_value
            })
            .collect()
    }

    /// Snapshots every tracked field's current value. Idempotent.
    pub fn mark_clean<T: Trackable>(&mut self, current: &T) {
        self.values = current.encode_tracked_fields();
        self.forced = false;
    }

    /// Clears the snapshot so every tracked field reads as dirty until the
    /// next `mark_clean`.
    pub fn mark_dirty(&mut self) {
        self.values.clear();
        self.forced = true;
    }

    /// Refreshes the snapshot only for the intersection of `names` with
    /// tracked fields, leaving all other fields' snapshot values (and hence
    /// their dirty status) untouched. Used by the store after a partial
    /// merge so unrelated user edits survive (spec's critical
    /// dirty-after-merge invariant).
    pub fn update_snapshot_for<T: Trackable>(&mut self, current: &T, names: &HashSet<String>) {
        let current = current.encode_tracked_fields();
        for name in names {
            if let Some(value) = current.get(name) {
                self.values.insert(name.clone(), value.clone());
            }
        }
        // A selective refresh is meaningful only once there is a concrete
        // snapshot to refresh into; an overriding `forced` flag from a prior
        // `mark_dirty` would make every untouched field dirty regardless of
        // the refresh, which selective update is specifically meant to avoid
        // for the *refreshed* fields only — so we drop `forced` and rely on
        // the per-field comparison from here on.
        self.forced = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        title: SnapshotValue,
        rating: SnapshotValue,
    }

    impl Trackable for Fixture {
        fn encode_tracked_fields(&self) -> HashMap<String, SnapshotValue> {
            let mut map = HashMap::new();
            map.insert("title".to_string(), self.title.clone());
            map.insert("rating".to_string(), self.rating.clone());
            map
        }
    }

    fn scalar(s: &str) -> SnapshotValue {
        SnapshotValue::Scalar(serde_json::Value::String(s.to_string()))
    }

    #[test]
    fn clean_after_mark_clean() {
        let entity = Fixture {
            title: scalar("Original"),
            rating: SnapshotValue::Scalar(70.into()),
        };
        let mut snapshot = Snapshot::new();
        snapshot.mark_clean(&entity);
        assert!(!snapshot.is_dirty(&entity));
        assert!(snapshot.changed_fields(&entity).is_empty());
    }

    #[test]
    fn dirty_after_field_change() {
        let mut entity = Fixture {
            title: scalar("Original"),
            rating: SnapshotValue::Scalar(70.into()),
        };
        let mut snapshot = Snapshot::new();
        snapshot.mark_clean(&entity);

        entity.title = scalar("Updated");
        assert!(snapshot.is_dirty(&entity));
        let changed = snapshot.changed_fields(&entity);
        assert_eq!(changed.len(), 1);
        assert!(changed.contains_key("title"));
    }

    #[test]
    fn mark_dirty_forces_all_tracked_fields() {
        let entity = Fixture {
            title: scalar("Original"),
            rating: SnapshotValue::Scalar(70.into()),
        };
        let mut snapshot = Snapshot::new();
        snapshot.mark_clean(&entity);
        snapshot.mark_dirty();
        assert!(snapshot.is_dirty(&entity));
        assert_eq!(snapshot.changed_fields(&entity).len(), 2);
    }

    #[test]
    fn selective_update_preserves_other_edits() {
        let mut entity = Fixture {
            title: scalar("Original"),
            rating: SnapshotValue::Scalar(70.into()),
        };
        let mut snapshot = Snapshot::new();
        snapshot.mark_clean(&entity);

        // User edits `rating` locally (not part of any payload).
        entity.rating = SnapshotValue::Scalar(80.into());
        // A merge arrives updating only `title`.
        entity.title = scalar("Merged");
        let mut touched = HashSet::new();
        touched.insert("title".to_string());
        snapshot.update_snapshot_for(&entity, &touched);

        let changed = snapshot.changed_fields(&entity);
        assert_eq!(changed.len(), 1);
        assert!(changed.contains_key("rating"));
        assert!(!changed.contains_key("title"));
    }
}
