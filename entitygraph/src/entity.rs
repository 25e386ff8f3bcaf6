//! Entity base (spec §4.4): lifecycle, typed field access, `to-input`, and
//! the type-erased view the store and relationship engine use to walk an
//! object graph whose nodes are concrete, differently-typed entities.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};

use crate::error::{GraphError, GraphResult};
use crate::field::FieldValue;
use crate::id;
use crate::schema::EntityMetadata;
use crate::snapshot::{Snapshot, SnapshotValue, Trackable};
use crate::store::Store;
use crate::transport::Transport;

/// Implemented by the `#[derive(Entity)]`-generated field struct for a
/// concrete entity type. The derive macro generates this so that the
/// generic store/relationship code never needs to know a type's concrete
/// field layout.
pub trait EntityFields: Trackable + Default + Send + Sync + 'static {
    fn id(&self) -> Option<&str>;
    fn set_id(&mut self, id: String);

    /// The current value of `field`, with its declared conversion already
    /// applied (entity ref → id, list → ids, wrapper → metadata input).
    /// `Unset` means "omit from input" (spec §4.4.1).
    fn input_value(&self, field: &str) -> FieldValue<Value>;

    /// Applies the fields present in `payload` onto `self`, hoisting any
    /// nested entity sub-payloads through `store` (spec §4.5 construction
    /// interception). Fields absent from `payload` are left untouched.
    /// Returns the set of schema field names actually present in `payload`.
    fn apply_payload(&mut self, payload: &Map<String, Value>, store: &Store) -> GraphResult<HashSet<String>>;

    /// Type-erased handles to the peer entities currently held by a
    /// relationship field, or an empty vec if the field is unset, not a
    /// relationship, or unknown.
    fn related_erased(&self, field: &str) -> Vec<Arc<dyn ErasedEntity>>;

    /// Mirrors a peer being linked onto `field` (push for a list
    /// relationship, replace for a single one), called on the peer's own
    /// fields by the owning side's `add_to_*`/`set_*` accessors (spec §4.6
    /// "both-sides maintenance"). `peer` is the calling side's own
    /// `Entity<Self>` handle, boxed since this side doesn't know its
    /// concrete type. Returns `false` if `field` isn't a relationship this
    /// type declares.
    fn mirror_link(&mut self, field: &str, peer: Box<dyn std::any::Any + Send + Sync>) -> bool;

    /// Mirrors a peer being unlinked from `field` (remove for a list
    /// relationship, clear for a single one, only if it currently holds
    /// `peer_id`). Returns `false` if `field` isn't a relationship this type
    /// declares.
    fn mirror_unlink(&mut self, field: &str, peer_id: &str) -> bool;
}

/// A type-erased view of any `Entity<T>`, used for dotted-path traversal
/// (populate, filter forms) and for cascade-style relationship bookkeeping
/// that must cross concrete type boundaries.
pub trait ErasedEntity: Send + Sync {
    fn type_name(&self) -> &'static str;
    fn entity_id(&self) -> Option<String>;
    fn has_received(&self, field: &str) -> bool;
    fn related(&self, field: &str) -> Vec<Arc<dyn ErasedEntity>>;

    /// Every relationship field name this concrete type declares, for
    /// callers (e.g. the relationship engine's cascade-style traversal) that
    /// must walk every edge without knowing the concrete type.
    fn relationship_fields(&self) -> Vec<&'static str>;
}

/// Internal per-instance state: typed fields, snapshot/dirty tracker, and
/// the new-vs-existing flag. Deliberately a separate, stable allocation from
/// the typed field struct so nothing here is lost to "rebuild on
/// assignment" semantics (spec §4.3, §9).
pub struct EntityState<T: EntityFields> {
    fields: Mutex<T>,
    snapshot: Mutex<Snapshot>,
    is_new: Mutex<bool>,
}

impl<T: EntityFields + EntityMetadata> ErasedEntity for EntityState<T> {
    fn type_name(&self) -> &'static str {
        T::TYPE_NAME
    }

    fn entity_id(&self) -> Option<String> {
        self.fields.lock().expect("entity fields poisoned").id().map(str::to_owned)
    }

    fn has_received(&self, field: &str) -> bool {
        self.snapshot.lock().expect("entity snapshot poisoned").has_received(field)
    }

    fn related(&self, field: &str) -> Vec<Arc<dyn ErasedEntity>> {
        self.fields.lock().expect("entity fields poisoned").related_erased(field)
    }

    fn relationship_fields(&self) -> Vec<&'static str> {
        T::entity_descriptor().relationships.iter().map(|r| r.field).collect()
    }
}

/// A handle to one in-memory entity. Clones share the same allocation —
/// required for identity-map semantics: two references to the same
/// `(store, type, id)` are the same object (spec invariant 1).
pub struct Entity<T: EntityFields>(pub(crate) Arc<EntityState<T>>);

impl<T: EntityFields> Clone for Entity<T> {
    fn clone(&self) -> Self {
        Entity(Arc::clone(&self.0))
    }
}

impl<T: EntityFields> Entity<T> {
    /// Direct, user-facing construction (spec §4.4): mints a local id if
    /// none is supplied, marks the instance new, and snapshots immediately
    /// (a direct construction has no "received fields").
    pub fn new(fields: T) -> Self {
        let mut fields = fields;
        let is_new = match fields.id() {
            Some(existing) if !existing.is_empty() => false,
            _ => {
                fields.set_id(id::generate_local_id());
                true
            }
        };
        let mut snapshot = Snapshot::new();
        snapshot.mark_clean(&fields);
        Entity(Arc::new(EntityState {
            fields: Mutex::new(fields),
            snapshot: Mutex::new(snapshot),
            is_new: Mutex::new(is_new),
        }))
    }

    /// Constructs directly from a payload with no store in scope (spec §4.4
    /// construction step 3 only applies "if a store is associated"). Used by
    /// `Store::materialize` for the cache-miss path after nested hoisting,
    /// and directly by callers with no store at all.
    pub(crate) fn from_payload_applied(mut fields: T, received: HashSet<String>) -> GraphResult<Self> {
        let is_new = match fields.id() {
            Some(existing) if !existing.is_empty() => false,
            _ => {
                fields.set_id(id::generate_local_id());
                true
            }
        };
        let mut snapshot = Snapshot::new();
        snapshot.mark_received(received);
        snapshot.mark_clean(&fields);
        Ok(Entity(Arc::new(EntityState {
            fields: Mutex::new(fields),
            snapshot: Mutex::new(snapshot),
            is_new: Mutex::new(is_new),
        })))
    }

    pub fn id(&self) -> Option<String> {
        self.0.fields.lock().expect("entity fields poisoned").id().map(str::to_owned)
    }

    /// True iff the id is a locally-minted token and the instance has not
    /// yet been saved (spec §4.4; the legacy `"new"` string marker is
    /// deliberately not recognized — see `id::looks_like_local_id`).
    pub fn is_new(&self) -> bool {
        *self.0.is_new.lock().expect("is_new poisoned")
    }

    /// Replaces the id exactly once, on first successful save.
    pub fn update_id(&self, server_id: String) {
        let mut fields = self.0.fields.lock().expect("entity fields poisoned");
        fields.set_id(server_id);
        drop(fields);
        *self.0.is_new.lock().expect("is_new poisoned") = false;
    }

    pub fn is_dirty(&self) -> bool {
        let fields = self.0.fields.lock().expect("entity fields poisoned");
        self.0.snapshot.lock().expect("snapshot poisoned").is_dirty(&*fields)
    }

    pub fn changed_fields(&self) -> HashMap<String, SnapshotValue> {
        let fields = self.0.fields.lock().expect("entity fields poisoned");
        self.0.snapshot.lock().expect("snapshot poisoned").changed_fields(&*fields)
    }

    pub fn mark_clean(&self) {
        let fields = self.0.fields.lock().expect("entity fields poisoned");
        self.0.snapshot.lock().expect("snapshot poisoned").mark_clean(&*fields);
    }

    pub fn mark_dirty(&self) {
        self.0.snapshot.lock().expect("snapshot poisoned").mark_dirty();
    }

    pub fn has_received(&self, field: &str) -> bool {
        self.0.snapshot.lock().expect("snapshot poisoned").has_received(field)
    }

    pub fn received_fields(&self) -> HashSet<String> {
        self.0.snapshot.lock().expect("snapshot poisoned").received_fields().clone()
    }

    /// Reads with a closure under the fields lock, for typed accessors the
    /// derive macro generates on top of this (e.g. `scene.title()`).
    pub fn with_fields<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.0.fields.lock().expect("entity fields poisoned"))
    }

    /// Mutates under the fields lock. Does not touch the snapshot — callers
    /// (typed setters the macro generates) decide whether/when to trigger
    /// inverse-sync; dirty status is recomputed lazily from the new value.
    pub fn with_fields_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.0.fields.lock().expect("entity fields poisoned"))
    }

    pub fn as_erased(&self) -> Arc<dyn ErasedEntity>
    where
        T: EntityMetadata,
    {
        self.0.clone() as Arc<dyn ErasedEntity>
    }

    /// True iff `self` and `other` are handles to the same underlying
    /// allocation — the identity-map guarantee (spec invariant 1) made
    /// checkable without exposing the inner `Arc`.
    pub fn is_same_instance(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<T: EntityFields + EntityMetadata> Entity<T> {
    /// Build the input JSON for create or update (spec §4.4.1).
    ///
    /// | Field state       | New emit? | Existing emit? |
    /// |--------------------|-----------|----------------|
    /// | Unset              | no        | no             |
    /// | Null               | yes       | iff dirty      |
    /// | Value, unchanged   | yes       | no             |
    /// | Value, changed     | yes       | yes            |
    pub fn to_input(&self) -> GraphResult<Value> {
        let descriptor = T::entity_descriptor();
        let fields = self.0.fields.lock().expect("entity fields poisoned");
        let mut map = Map::new();

        if self.is_new() {
            for field in &descriptor.fields {
                match fields.input_value(field.name) {
                    FieldValue::Unset => {}
                    FieldValue::Null => {
                        map.insert(field.input_key.to_string(), Value::Null);
                    }
                    FieldValue::Value(v) => {
                        map.insert(field.input_key.to_string(), v);
                    }
                }
            }
            for rel in &descriptor.relationships {
                match fields.input_value(rel.field) {
                    FieldValue::Unset => {}
                    FieldValue::Null => {
                        map.insert(rel.target_field.to_string(), Value::Null);
                    }
                    FieldValue::Value(v) => {
                        map.insert(rel.target_field.to_string(), v);
                    }
                }
            }
        } else {
            let id = fields.id().ok_or_else(|| {
                GraphError::InvalidRequest {
                    message: "existing entity has no id".to_string(),
                }
            })?;
            map.insert("id".to_string(), Value::String(id.to_string()));
            drop(fields);
            let changed = self.changed_fields();
            let fields = self.0.fields.lock().expect("entity fields poisoned");
            for name in changed.keys() {
                let field_or_rel_key = descriptor
                    .field(name)
                    .map(|f| f.input_key)
                    .or_else(|| descriptor.relationship(name).map(|r| r.target_field))
                    .unwrap_or(name.as_str());
                match fields.input_value(name) {
                    FieldValue::Unset => {}
                    FieldValue::Null => {
                        map.insert(field_or_rel_key.to_string(), Value::Null);
                    }
                    FieldValue::Value(v) => {
                        map.insert(field_or_rel_key.to_string(), v);
                    }
                }
            }
        }

        Ok(Value::Object(map))
    }

    /// Thin orchestrator (spec §4.4): chooses create vs update from
    /// `is_new()`, sends the built input through `transport`, adopts the
    /// server id on a successful create, and marks the instance clean. The
    /// only persistence operation the core prescribes — everything else
    /// (the per-entity operation catalog) lives above this crate.
    pub async fn save(&self, transport: &dyn Transport, create_operation: &str, update_operation: &str) -> GraphResult<()> {
        let input = self.to_input()?;
        let variables = Value::Object({
            let mut map = Map::new();
            map.insert("input".to_string(), input);
            map
        });

        if self.is_new() {
            tracing::debug!(type_name = T::TYPE_NAME, operation = create_operation, "saving new entity");
            let response = transport.execute(create_operation, variables).await?;
            if let Some(id) = response.get("id").and_then(Value::as_str) {
                self.update_id(id.to_string());
            }
        } else {
            let id = self.id().unwrap_or_default();
            tracing::debug!(type_name = T::TYPE_NAME, id, operation = update_operation, "saving existing entity");
            transport.execute(update_operation, variables).await?;
        }

        self.mark_clean();
        Ok(())
    }

    /// Thin orchestrator (spec §4.4): invokes the destroy operation, then
    /// invalidates this entity's store entry so a later `get`/`populate`
    /// re-fetches rather than reading a stale cached instance.
    pub async fn delete(&self, transport: &dyn Transport, operation: &str, store: &Store) -> GraphResult<()> {
        let id = self.id().ok_or_else(|| GraphError::InvalidRequest {
            message: "cannot delete an entity without an id".to_string(),
        })?;
        tracing::debug!(type_name = T::TYPE_NAME, id, operation, "deleting entity");
        transport.execute(operation, serde_json::json!({ "id": id })).await?;
        store.invalidate::<T>(&id);
        Ok(())
    }
}

