//! Field and relationship metadata (spec §4.2), plus the process-wide schema
//! registry used by the identity map for polymorphism and by the
//! relationship engine for inverse lookups.
//!
//! Grounded in the teacher's `registry.rs` `OnceLock<RwLock<HashMap<..>>>`
//! pattern and `types.rs` `EntityDescriptor`/`RelationDescriptor`, scaled to
//! exactly the fields spec §4.2/§4.6 declare (no RediSearch index flags, no
//! Redis-specific cascade policy).

use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

/// How the inverse side of a relationship is read (spec §3, §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStrategy {
    /// The peer exposes the inverse as a list field in its own fragment.
    DirectField,
    /// The peer exposes only a count/filter query; reading the list
    /// requires a remote, transport-backed find against the owning id
    /// (`relationship::resolve_filter_query`).
    FilterQuery,
}

/// Declarative metadata for one relationship field (spec §3).
#[derive(Debug, Clone)]
pub struct RelationshipMetadata {
    /// Local field name this metadata describes.
    pub field: &'static str,
    /// Key used in the create/update input payload.
    pub target_field: &'static str,
    /// Key used in read payloads (may differ from `target_field`).
    pub query_field: &'static str,
    /// Many-to-many / many-to-one (list) vs one-to-one (single).
    pub is_list: bool,
    /// Peer entity type-name.
    pub inverse_type: &'static str,
    /// Field on the peer holding this owning entity, if the peer exposes it.
    pub inverse_query_field: Option<&'static str>,
    /// How to read the inverse side.
    pub query_strategy: QueryStrategy,
}

/// How a local field value is converted into its wire representation for
/// create/update input (spec §4.2). Relationship fields carry their own
/// conversion implicitly (`Entity<T>`/`Entity<Vec<T>>` always lower to an
/// id or id list — see `Entity::input_value`'s relationship arms); this
/// enum is for the plain tracked/untracked fields a `FieldDescriptor`
/// declares, which are always emitted as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldConversion {
    /// Emitted as-is (scalar).
    Identity,
}

/// Declares a single tracked or conversion-bearing field.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    pub name: &'static str,
    /// Key used in create/update input payloads, if different from `name`.
    pub input_key: &'static str,
    pub conversion: FieldConversion,
    /// Whether this field participates in dirty detection (spec §3).
    pub tracked: bool,
}

/// Frozen, schema-load-time metadata for one entity type (spec §4.2).
#[derive(Debug, Clone)]
pub struct EntityDescriptor {
    pub type_name: &'static str,
    pub create_input_type: &'static str,
    pub update_input_type: &'static str,
    /// Field declarations in declared order (repr shallowing needs a
    /// deterministic order, spec §9).
    pub fields: Vec<FieldDescriptor>,
    pub relationships: Vec<RelationshipMetadata>,
    /// Ordered fields used to render a compact description.
    pub short_repr_fields: Vec<&'static str>,
    /// Concrete subtype names this type accepts when it is an interface or
    /// union's declared field type (spec §4.5 polymorphism). Empty for a
    /// concrete, non-polymorphic type.
    pub concrete_subtypes: Vec<&'static str>,
}

impl EntityDescriptor {
    pub fn tracked_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.tracked)
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn relationship(&self, name: &str) -> Option<&RelationshipMetadata> {
        self.relationships.iter().find(|r| r.field == name)
    }

    /// True iff `type_tag` names this type or one of its declared concrete
    /// subtypes (spec §4.5 type validation).
    pub fn accepts_type_tag(&self, type_tag: &str) -> bool {
        self.type_name == type_tag || self.concrete_subtypes.iter().any(|t| *t == type_tag)
    }
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct RegistryKey(&'static str);

static REGISTRY: OnceLock<RwLock<HashMap<RegistryKey, EntityDescriptor>>> = OnceLock::new();

fn registry() -> &'static RwLock<HashMap<RegistryKey, EntityDescriptor>> {
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Registers (or replaces) an entity type's descriptor. Called once per type,
/// normally from generated `#[derive(Entity)]` code via `EntityMetadata::ensure_registered`.
pub fn register_descriptor(descriptor: EntityDescriptor) {
    registry()
        .write()
        .expect("schema registry poisoned")
        .insert(RegistryKey(descriptor.type_name), descriptor);
}

pub fn get_descriptor(type_name: &str) -> Option<EntityDescriptor> {
    registry().read().expect("schema registry poisoned").get(&RegistryKey(type_name)).cloned()
}

/// Information about a relationship pointing *to* `target_type` from some
/// other registered type, keyed by the target's own relationship metadata
/// for the field on that other type.
///
/// Used by the relationship engine to discover which registered types
/// declare `target_type` as their `inverse_type`, without requiring every
/// relationship to declare `inverse_query_field` explicitly.
#[derive(Debug, Clone)]
pub struct IncomingRelationship {
    pub source_type: &'static str,
    pub metadata: RelationshipMetadata,
}

pub fn find_incoming_relationships(target_type: &str) -> Vec<IncomingRelationship> {
    let reg = registry().read().expect("schema registry poisoned");
    let mut incoming = Vec::new();
    for descriptor in reg.values() {
        for relationship in &descriptor.relationships {
            if relationship.inverse_type == target_type {
                incoming.push(IncomingRelationship {
                    source_type: descriptor.type_name,
                    metadata: relationship.clone(),
                });
            }
        }
    }
    incoming
}

/// Trait every `#[derive(Entity)]`-generated type implements: exposes its
/// frozen schema and guarantees one-time registration (spec §4.2).
pub trait EntityMetadata {
    const TYPE_NAME: &'static str;

    fn entity_descriptor() -> EntityDescriptor;

    /// Idempotently registers this type's descriptor in the global registry.
    fn ensure_registered() {
        if get_descriptor(Self::TYPE_NAME).is_none() {
            register_descriptor(Self::entity_descriptor());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_descriptor(name: &'static str) -> EntityDescriptor {
        EntityDescriptor {
            type_name: name,
            create_input_type: "CreateInput",
            update_input_type: "UpdateInput",
            fields: vec![FieldDescriptor {
                name: "title",
                input_key: "title",
                conversion: FieldConversion::Identity,
                tracked: true,
            }],
            relationships: vec![],
            short_repr_fields: vec!["title"],
            concrete_subtypes: vec![],
        }
    }

    #[test]
    fn register_and_fetch_roundtrips() {
        register_descriptor(sample_descriptor("SchemaTestEntity"));
        let fetched = get_descriptor("SchemaTestEntity").expect("registered");
        assert_eq!(fetched.type_name, "SchemaTestEntity");
        assert!(fetched.accepts_type_tag("SchemaTestEntity"));
        assert!(!fetched.accepts_type_tag("Other"));
    }

    #[test]
    fn finds_incoming_relationships() {
        let mut parent = sample_descriptor("SchemaParent");
        parent.relationships.push(RelationshipMetadata {
            field: "children",
            target_field: "children",
            query_field: "children",
            is_list: true,
            inverse_type: "SchemaChild",
            inverse_query_field: Some("parent"),
            query_strategy: QueryStrategy::DirectField,
        });
        register_descriptor(parent);
        register_descriptor(sample_descriptor("SchemaChild"));

        let incoming = find_incoming_relationships("SchemaChild");
        assert!(incoming.iter().any(|r| r.source_type == "SchemaParent"));
    }
}
