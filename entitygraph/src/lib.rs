//! entitygraph: object-graph runtime core for a GraphQL media-catalog
//! client.
//!
//! Three-state fields (never-observed vs explicitly-null vs a value),
//! identity-mapped entities held in a process-wide store, field-by-field
//! dirty tracking against a server-confirmed snapshot, and a relationship
//! engine that mirrors edits onto an already-loaded peer without ever
//! triggering a fetch of its own. The crate never builds a GraphQL query
//! itself — it is a thin, typed substrate that a generated per-entity
//! operation catalog sits on top of, talking to the outside world only
//! through [`transport::Transport`].

pub mod config;
pub mod entity;
pub mod error;
pub mod field;
pub mod filter;
pub mod id;
pub mod relationship;
pub mod scalars;
pub mod schema;
pub mod snapshot;
pub mod store;
pub mod testing;
pub mod transport;

pub use entity::{Entity, EntityFields, ErasedEntity};
pub use error::{GraphError, GraphResult, ValidationError, ValidationIssue, ValidationResult};
pub use field::{FieldValue, Unset};
pub use schema::{
    EntityDescriptor, EntityMetadata, FieldConversion, FieldDescriptor, QueryStrategy, RelationshipMetadata,
};
pub use snapshot::{Snapshot, SnapshotValue, Trackable};
pub use store::{FilterStats, Store};
pub use transport::Transport;

pub use entitygraph_macros::Entity;
