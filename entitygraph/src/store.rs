//! Identity map / entity store (spec §4.5).
//!
//! Keyed `(type-name, id)` cache with TTL and a single lock protecting cache
//! mutation. Hoists nested entities out of payloads into the cache before
//! the parent is validated, merges incremental fields on cache hits, and
//! offers read-through fetch, field-aware populate, strict filtering,
//! populate-and-filter, and a lazy streaming filter.
//!
//! Grounded in the teacher's key-addressed repository pattern
//! (`keys::KeyContext`, `repository::Repo`) generalized from a Redis-backed
//! single-type repo to an in-process, multi-type identity map, and in the
//! pack's `vantage-live` crate's role (a locally-cached, write-through
//! wrapper) for the TTL/monotonic-clock shape of a cache entry.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::time::Instant;

use crate::entity::{Entity, EntityFields, ErasedEntity};
use crate::error::{GraphError, GraphResult};
use crate::schema::EntityMetadata;

struct CacheEntry {
    entity: Arc<dyn Any + Send + Sync>,
    inserted_at: Instant,
    ttl: Option<Duration>,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        match self.ttl {
            Some(ttl) => now.duration_since(self.inserted_at) >= ttl,
            None => false,
        }
    }
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct CacheKey {
    type_name: &'static str,
    id: String,
}

/// The identity map. One `Store` is shared (typically via `Arc`) across all
/// tasks that should observe the same in-memory object graph.
///
/// The cache map is guarded by a plain `std::sync::Mutex`: every critical
/// section here is synchronous (lock, inspect/mutate, unlock) and never
/// spans an `.await`, so a non-reentrant lock is sufficient even though
/// materializing a payload recurses into nested `materialize` calls — the
/// outer critical section always finishes (and releases the lock) before
/// recursing into a nested one (spec §5's "no suspension point under the
/// cache lock" requirement, applied to recursion as well as `.await`).
pub struct Store {
    cache: Mutex<HashMap<CacheKey, CacheEntry>>,
    default_ttl: Option<Duration>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Store {
    pub fn new(default_ttl: Option<Duration>) -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
            default_ttl,
        }
    }

    /// Synchronous cache peek — no transport call, no materialization.
    /// Used by callers that already know an entity must be cached (e.g.
    /// testing invariant 7: "cache hit equals cache entity").
    pub fn get_cached<T: EntityFields + EntityMetadata>(&self, id: &str) -> Option<Entity<T>> {
        let key = CacheKey {
            type_name: T::TYPE_NAME,
            id: id.to_string(),
        };
        let now = Instant::now();
        let mut cache = self.cache.lock().expect("store cache poisoned");
        match cache.get(&key) {
            Some(entry) if !entry.is_expired(now) => {
                tracing::trace!(type_name = T::TYPE_NAME, id, "cache hit");
                let arc = entry.entity.clone().downcast::<crate::entity::EntityState<T>>().ok()?;
                Some(Entity(arc))
            }
            Some(_) => {
                tracing::debug!(type_name = T::TYPE_NAME, id, "evicting expired cache entry");
                cache.remove(&key);
                None
            }
            None => {
                tracing::trace!(type_name = T::TYPE_NAME, id, "cache miss");
                None
            }
        }
    }

    fn insert<T: EntityFields + EntityMetadata>(&self, id: &str, entity: &Entity<T>) {
        let key = CacheKey {
            type_name: T::TYPE_NAME,
            id: id.to_string(),
        };
        let entry = CacheEntry {
            entity: Arc::clone(&entity.0) as Arc<dyn Any + Send + Sync>,
            inserted_at: Instant::now(),
            ttl: self.default_ttl,
        };
        self.cache.lock().expect("store cache poisoned").insert(key, entry);
    }

    /// Invalidates a single cached entity.
    pub fn invalidate<T: EntityMetadata>(&self, id: &str) {
        let key = CacheKey {
            type_name: T::TYPE_NAME,
            id: id.to_string(),
        };
        tracing::debug!(type_name = T::TYPE_NAME, id, "invalidating cache entry");
        self.cache.lock().expect("store cache poisoned").remove(&key);
    }

    /// Invalidates all entries of type `T` (spec invariant 5).
    pub fn clear_type<T: EntityMetadata>(&self) {
        let mut cache = self.cache.lock().expect("store cache poisoned");
        cache.retain(|key, _| key.type_name != T::TYPE_NAME);
    }

    /// Invalidates every cached entity of every type.
    pub fn clear_all(&self) {
        self.cache.lock().expect("store cache poisoned").clear();
    }

    /// All live, non-expired entities of type `T`. Takes a cache snapshot
    /// (clone the Arcs) under the lock, then releases it before any
    /// predicate runs — required so filter evaluation (which may itself
    /// call back into the store) never runs while the cache lock is held.
    pub fn entities_of_type<T: EntityFields + EntityMetadata>(&self) -> Vec<Entity<T>> {
        let now = Instant::now();
        let mut cache = self.cache.lock().expect("store cache poisoned");
        let mut expired = Vec::new();
        let mut out = Vec::new();
        for (key, entry) in cache.iter() {
            if key.type_name != T::TYPE_NAME {
                continue;
            }
            if entry.is_expired(now) {
                expired.push(key.clone());
                continue;
            }
            if let Some(arc) = entry.entity.clone().downcast::<crate::entity::EntityState<T>>().ok() {
                out.push(Entity(arc));
            }
        }
        for key in expired {
            cache.remove(&key);
        }
        out
    }

    /// Construction-interception protocol (spec §4.5).
    ///
    /// `payload` is a full JSON object as received from the server (or
    /// assembled by a caller), including `__typename` and `id` where
    /// present.
    #[tracing::instrument(skip(self, payload), fields(type_name = T::TYPE_NAME))]
    pub fn materialize<T: EntityFields + EntityMetadata>(&self, payload: Value) -> GraphResult<Entity<T>> {
        let Value::Object(mut map) = payload else {
            return Err(GraphError::InvalidRequest {
                message: "entity payload must be a JSON object".to_string(),
            });
        };

        if let Some(Value::String(tag)) = map.get("__typename") {
            let descriptor = T::entity_descriptor();
            if !descriptor.accepts_type_tag(tag) {
                return Err(GraphError::TypeMismatch {
                    expected: T::TYPE_NAME.to_string(),
                    found: tag.clone(),
                });
            }
        }
        map.remove("__typename");

        let id = match map.get("id") {
            Some(Value::String(id)) if !id.is_empty() => Some(id.clone()),
            _ => None,
        };

        let Some(id) = id else {
            // Spec step 1: no id present ⇒ construct normally, no cache
            // interaction for this record (nested children may still be
            // hoisted through `store` inside `apply_payload`).
            let mut fields = T::default();
            let received = fields.apply_payload(&map, self)?;
            return Entity::from_payload_applied(fields, received);
        };

        if let Some(existing) = self.get_cached::<T>(&id) {
            let received = existing.with_fields_mut(|fields| fields.apply_payload(&map, self))?;
            tracing::debug!(type_name = T::TYPE_NAME, id, fields = ?received, "selective snapshot refresh after merge");
            existing.mark_received_and_refresh(&received);
            return Ok(existing);
        }

        tracing::debug!(type_name = T::TYPE_NAME, id, "hoisting new entity into store");
        let mut fields = T::default();
        fields.set_id(id.clone());
        let received = fields.apply_payload(&map, self)?;
        let entity = Entity::from_payload_applied(fields, received)?;
        self.insert(&id, &entity);
        Ok(entity)
    }

    /// Read-through fetch by id. Returns `Ok(None)` on not-found — a
    /// not-found result is not an error (spec §7).
    pub async fn get<T: EntityFields + EntityMetadata>(
        &self,
        transport: &dyn crate::transport::Transport,
        operation: &str,
        id: &str,
    ) -> GraphResult<Option<Entity<T>>> {
        if let Some(cached) = self.get_cached::<T>(id) {
            return Ok(Some(cached));
        }
        let variables = serde_json::json!({ "id": id });
        let response = transport.execute(operation, variables).await?;
        if response.is_null() {
            return Ok(None);
        }
        Ok(Some(self.materialize::<T>(response)?))
    }

    /// Field-aware populate (spec §4.5 Populate).
    ///
    /// `fields` may be simple names or dotted paths of arbitrary depth.
    /// Idempotent: if every path is already satisfied, no transport call is
    /// made.
    pub async fn populate<T: EntityFields + EntityMetadata>(
        &self,
        transport: &dyn crate::transport::Transport,
        operation: &str,
        entity: &Entity<T>,
        fields: &[&str],
        force: bool,
    ) -> GraphResult<()> {
        let missing = missing_paths(entity.as_erased(), fields, force);
        if missing.is_empty() {
            tracing::trace!(type_name = T::TYPE_NAME, operation, "populate is a no-op, all fields already satisfied");
            return Ok(());
        }
        let id = entity.id().ok_or_else(|| GraphError::InvalidRequest {
            message: "cannot populate an entity without an id".to_string(),
        })?;
        tracing::debug!(type_name = T::TYPE_NAME, id, operation, missing = ?missing, "populating missing fields");
        let variables = serde_json::json!({ "id": id, "fields": missing });
        let response = transport.execute(operation, variables).await?;
        self.materialize::<T>(response)?;
        Ok(())
    }

    /// `filter-strict`: fails naming the first entity missing a required
    /// field rather than fetching it.
    pub fn filter_strict<T, F>(&self, required: &[&str], pred: F) -> GraphResult<Vec<Entity<T>>>
    where
        T: EntityFields + EntityMetadata,
        F: Fn(&Entity<T>) -> bool,
    {
        let mut matches = Vec::new();
        for entity in self.entities_of_type::<T>() {
            let missing = missing_paths(entity.as_erased(), required, false);
            if !missing.is_empty() {
                return Err(GraphError::StrictFilterGap {
                    entity_id: entity.id().unwrap_or_default(),
                    missing,
                });
            }
            if pred(&entity) {
                matches.push(entity);
            }
        }
        Ok(matches)
    }

    /// `filter-and-populate`: fetches just the missing fields for entities
    /// lacking them, dispatching every entity within a batch concurrently
    /// (batches themselves run one after another), then evaluates.
    pub async fn filter_and_populate<T, F>(
        &self,
        transport: &dyn crate::transport::Transport,
        operation: &str,
        required: &[&str],
        pred: F,
        batch: usize,
    ) -> GraphResult<Vec<Entity<T>>>
    where
        T: EntityFields + EntityMetadata,
        F: Fn(&Entity<T>) -> bool,
    {
        let (matches, _stats) = self
            .filter_and_populate_with_stats(transport, operation, required, pred, batch)
            .await?;
        Ok(matches)
    }

    /// Same as `filter_and_populate`, plus population statistics.
    pub async fn filter_and_populate_with_stats<T, F>(
        &self,
        transport: &dyn crate::transport::Transport,
        operation: &str,
        required: &[&str],
        pred: F,
        batch: usize,
    ) -> GraphResult<(Vec<Entity<T>>, FilterStats)>
    where
        T: EntityFields + EntityMetadata,
        F: Fn(&Entity<T>) -> bool,
    {
        let all = self.entities_of_type::<T>();
        let total_cached = all.len();
        let batch = batch.max(1);

        let mut needing_population = Vec::new();
        for entity in &all {
            if !missing_paths(entity.as_erased(), required, false).is_empty() {
                needing_population.push(entity.clone());
            }
        }
        let needed_population = needing_population.len();
        let mut populated_fields = 0usize;

        for chunk in needing_population.chunks(batch) {
            let results = futures_util::future::join_all(
                chunk.iter().map(|entity| self.populate(transport, operation, entity, required, false)),
            )
            .await;
            for result in results {
                result?;
                populated_fields += 1;
            }
        }

        let mut matches = Vec::new();
        for entity in &all {
            if pred(entity) {
                matches.push(entity.clone());
            }
        }

        let stats = FilterStats {
            total_cached,
            needed_population,
            populated_fields,
            matches: matches.len(),
            cache_hit_rate: if total_cached == 0 {
                1.0
            } else {
                (total_cached - needed_population) as f64 / total_cached as f64
            },
        };
        Ok((matches, stats))
    }

    /// `populated-filter-iter`: fetches on demand in sub-batches of
    /// `populate_batch` (every entity within a sub-batch populated
    /// concurrently), evaluates in sub-batches of `yield_batch`, and yields
    /// matches lazily.
    pub fn populated_filter_iter<'a, T, F>(
        &'a self,
        transport: &'a dyn crate::transport::Transport,
        operation: &'a str,
        required: Vec<&'static str>,
        pred: F,
        populate_batch: usize,
        yield_batch: usize,
    ) -> impl futures_util::stream::Stream<Item = GraphResult<Entity<T>>> + 'a
    where
        T: EntityFields + EntityMetadata + 'a,
        F: Fn(&Entity<T>) -> bool + 'a,
    {
        use futures_util::future::Either;
        use futures_util::stream::{self, StreamExt};

        let all = self.entities_of_type::<T>();
        let populate_batch = populate_batch.max(1);
        let yield_batch = yield_batch.max(1);

        stream::iter(all.into_iter().collect::<Vec<_>>())
            .chunks(populate_batch)
            .then(move |chunk| {
                let required = required.clone();
                async move {
                    let results = futures_util::future::join_all(
                        chunk.iter().map(|entity| self.populate(transport, operation, entity, &required, false)),
                    )
                    .await;
                    for result in results {
                        result?;
                    }
                    Ok(chunk)
                }
            })
            .map(move |result| match result {
                Ok(chunk) => Either::Left(stream::iter(
                    chunk.into_iter().filter(|e| pred(e)).map(Ok).collect::<Vec<_>>(),
                )),
                Err(err) => Either::Right(stream::iter(vec![Err(err)])),
            })
            .flatten()
            .chunks(yield_batch)
            .flat_map(|chunk| stream::iter(chunk))
    }
}

/// Population/filter statistics (spec §4.5 `filter-and-populate-with-stats`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterStats {
    pub total_cached: usize,
    pub needed_population: usize,
    pub populated_fields: usize,
    pub matches: usize,
    pub cache_hit_rate: f64,
}

/// Computes, for each requested dotted path, whether it is already fully
/// satisfied by received fields reachable from `root`; returns the subset
/// that is still missing (spec §4.5 populate walk).
fn missing_paths(root: Arc<dyn ErasedEntity>, paths: &[&str], force: bool) -> Vec<String> {
    let mut missing = Vec::new();
    for path in paths {
        if !path_satisfied(root.clone(), path, force) {
            missing.push((*path).to_string());
        }
    }
    missing
}

fn path_satisfied(entity: Arc<dyn ErasedEntity>, path: &str, force: bool) -> bool {
    let (head, rest) = match path.split_once('.') {
        Some((h, r)) => (h, Some(r)),
        None => (path, None),
    };

    if force || !entity.has_received(head) {
        return false;
    }

    match rest {
        None => true,
        Some(rest) => entity
            .related(head)
            .iter()
            .all(|child| path_satisfied(child.clone(), rest, false)),
    }
}

impl<T: EntityFields> Entity<T> {
    /// Merge step used by `Store::materialize` on a cache hit (spec
    /// invariant 2): unions received fields and refreshes the snapshot only
    /// for the fields actually present in this payload.
    pub(crate) fn mark_received_and_refresh(&self, received: &std::collections::HashSet<String>) {
        let fields = self.0.fields.lock().expect("entity fields poisoned");
        let mut snapshot = self.0.snapshot.lock().expect("snapshot poisoned");
        snapshot.mark_received(received.iter().cloned());
        snapshot.update_snapshot_for(&*fields, received);
    }
}
