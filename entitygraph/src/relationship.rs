//! Relationship engine (spec §4.6).
//!
//! Resolves which read strategy applies to an inverse field, and mirrors a
//! local edit onto a relationship's peer side when the peer is already
//! loaded — never triggering a fetch purely to perform the mirror (spec's
//! "inverse sync never fetches" invariant).
//!
//! Grounded in the teacher's `types.rs` `RelationState<T>`/`RelationDescriptor`
//! (three read strategies, list vs single) and `client/registration.rs`
//! (registering one side's metadata alongside the other's).

use std::sync::Arc;

use crate::entity::{Entity, EntityFields, ErasedEntity};
use crate::error::{GraphError, GraphResult};
use crate::filter::{exact, Criterion, FilterOperand};
use crate::schema::{EntityMetadata, QueryStrategy, RelationshipMetadata};
use crate::store::Store;
use crate::transport::Transport;

/// Looks up how to read `field`'s inverse side, given the owning type's
/// registered relationship metadata.
pub fn query_strategy_for<T: EntityMetadata>(field: &str) -> Option<QueryStrategy> {
    T::entity_descriptor().relationship(field).map(|r| r.query_strategy)
}

/// Describes one step of inverse-sync bookkeeping the derive-generated
/// setter should perform after assigning a relationship field locally.
pub enum InverseSync {
    /// Peer's inverse field isn't loaded (or the relationship declares no
    /// `inverse_query_field`) — nothing to mirror, by design (spec §4.6:
    /// inverse sync never triggers a fetch).
    Skipped,
    /// The peer at `peer_id` (of type `peer_type`) should have `self_id`
    /// added to its `inverse_field` (list relationships).
    AddToList {
        peer_type: &'static str,
        peer_id: String,
        inverse_field: &'static str,
    },
    /// The peer at `peer_id` should have `inverse_field` set to `self_id`
    /// (single-valued relationships).
    SetSingle {
        peer_type: &'static str,
        peer_id: String,
        inverse_field: &'static str,
    },
    /// The peer previously referenced at `peer_id` should have `self_id`
    /// removed from (list) or cleared from (single) `inverse_field`.
    Remove {
        peer_type: &'static str,
        peer_id: String,
        inverse_field: &'static str,
        list: bool,
    },
}

/// Computes the inverse-sync steps for assigning `new_peers` (replacing
/// `previous_peers`) on `metadata`, consulting only peers that are already
/// present in `loaded_peers` (i.e. known to the caller without a fetch).
///
/// `loaded_peers` maps an id to whether that peer's inverse field has
/// already been observed (`ErasedEntity::has_received`); peers absent from
/// this map, or present but not yet having received the inverse field, are
/// skipped.
pub fn plan_inverse_sync(
    metadata: &RelationshipMetadata,
    previous: &[String],
    current: &[String],
    loaded_peers: &dyn Fn(&str) -> Option<Arc<dyn ErasedEntity>>,
) -> Vec<InverseSync> {
    let Some(inverse_field) = metadata.inverse_query_field else {
        return Vec::new();
    };

    let mut steps = Vec::new();

    let removed = previous.iter().filter(|id| !current.contains(id));
    for id in removed {
        if let Some(peer) = loaded_peers(id) {
            if peer.has_received(inverse_field) {
                steps.push(InverseSync::Remove {
                    peer_type: metadata.inverse_type,
                    peer_id: id.clone(),
                    inverse_field,
                    list: matches!(metadata.query_strategy, QueryStrategy::DirectField) && metadata.is_list,
                });
            }
        }
    }

    let added = current.iter().filter(|id| !previous.contains(id));
    for id in added {
        let Some(peer) = loaded_peers(id) else {
            continue;
        };
        if !peer.has_received(inverse_field) {
            continue;
        }
        if metadata.is_list {
            steps.push(InverseSync::AddToList {
                peer_type: metadata.inverse_type,
                peer_id: id.clone(),
                inverse_field,
            });
        } else {
            steps.push(InverseSync::SetSingle {
                peer_type: metadata.inverse_type,
                peer_id: id.clone(),
                inverse_field,
            });
        }
    }

    if !steps.is_empty() {
        tracing::debug!(field = metadata.field, inverse_field, steps = steps.len(), "applying inverse-sync steps");
    }
    steps
}

/// Resolves `field` on `owner` using the `FilterQuery` read strategy (spec
/// §4.6): the peer type exposes no direct list field for the inverse side,
/// so reading it means issuing a remote, transport-backed find for peers
/// whose inverse field matches `owner`'s id, rather than reading anything
/// already held locally. Errors if `field` isn't declared, isn't a
/// `FilterQuery` relationship, or declares no `inverse_query_field` to
/// filter by.
pub async fn resolve_filter_query<T, R>(
    transport: &dyn Transport,
    owner: &Entity<T>,
    field: &str,
    operation: &str,
    store: &Store,
    page_size: usize,
) -> GraphResult<Vec<Entity<R>>>
where
    T: EntityFields + EntityMetadata,
    R: EntityFields + EntityMetadata,
{
    let metadata = T::entity_descriptor().relationship(field).cloned().ok_or_else(|| GraphError::InvalidRequest {
        message: format!("`{field}` is not a declared relationship on {}", T::TYPE_NAME),
    })?;
    if metadata.query_strategy != QueryStrategy::FilterQuery {
        return Err(GraphError::InvalidRequest {
            message: format!("relationship `{field}` does not use the filter-query read strategy"),
        });
    }
    let inverse_field = metadata.inverse_query_field.ok_or_else(|| GraphError::InvalidRequest {
        message: format!("relationship `{field}` has no inverse_query_field to filter by"),
    })?;
    let owner_id = owner.id().ok_or_else(|| GraphError::InvalidRequest {
        message: "cannot resolve a filter-query relationship for an entity without an id".to_string(),
    })?;

    let criteria = vec![Criterion::new(inverse_field, |_: &R| FilterOperand::Null, exact(owner_id))];
    crate::filter::find_remote(transport, operation, &criteria, store, page_size).await
}

/// Recursively collects every entity reachable from `root` following
/// relationship edges, used by cascade-style bookkeeping and by the store's
/// dotted-path walk. Stops revisiting an id it has already seen, so cycles
/// through bidirectional relationships terminate.
pub fn reachable_entities(root: Arc<dyn ErasedEntity>) -> Vec<Arc<dyn ErasedEntity>> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    let mut stack = vec![root];
    while let Some(entity) = stack.pop() {
        let key = (entity.type_name(), entity.entity_id().unwrap_or_default());
        if !seen.insert(key) {
            continue;
        }
        for field in entity.relationship_fields() {
            for peer in entity.related(field) {
                stack.push(peer);
            }
        }
        out.push(entity.clone());
    }
    out
}

/// Typed convenience used by generated setters: given the full list of
/// relationship-id snapshots before and after an assignment, compute which
/// ids changed.
pub fn diff_ids(previous: &[String], current: &[String]) -> (Vec<String>, Vec<String>) {
    let added = current.iter().filter(|id| !previous.contains(id)).cloned().collect();
    let removed = previous.iter().filter(|id| !current.contains(id)).cloned().collect();
    (added, removed)
}

/// Extracts this entity's current ids for a list relationship field, via its
/// type-erased related-entities view — used when only `ErasedEntity` access
/// is available (e.g. from within the store).
pub fn related_ids<T: EntityFields + EntityMetadata>(entity: &Entity<T>, field: &str) -> Vec<String> {
    entity
        .as_erased()
        .related(field)
        .iter()
        .filter_map(|e| e.entity_id())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list_metadata() -> RelationshipMetadata {
        RelationshipMetadata {
            field: "tags",
            target_field: "tag_ids",
            query_field: "tags",
            is_list: true,
            inverse_type: "RelTestTag",
            inverse_query_field: Some("scenes"),
            query_strategy: QueryStrategy::DirectField,
        }
    }

    #[test]
    fn diff_ids_reports_additions_and_removals() {
        let previous = vec!["a".to_string(), "b".to_string()];
        let current = vec!["b".to_string(), "c".to_string()];
        let (added, removed) = diff_ids(&previous, &current);
        assert_eq!(added, vec!["c".to_string()]);
        assert_eq!(removed, vec!["a".to_string()]);
    }

    #[test]
    fn skips_relationships_without_inverse_query_field() {
        let mut metadata = list_metadata();
        metadata.inverse_query_field = None;
        let steps = plan_inverse_sync(&metadata, &[], &["x".to_string()], &|_| None);
        assert!(steps.is_empty());
    }

    #[test]
    fn skips_unloaded_peers() {
        let metadata = list_metadata();
        let steps = plan_inverse_sync(&metadata, &[], &["x".to_string()], &|_| None);
        assert!(steps.is_empty());
    }
}
