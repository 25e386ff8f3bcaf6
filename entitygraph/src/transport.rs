//! The abstract remote collaborator the core consumes (spec §6).
//!
//! The core never knows a GraphQL operation name or variable shape; it
//! delegates to whatever per-entity operation catalog sits above it, which
//! in turn calls `Transport::execute`/`subscribe`. This crate only needs an
//! object that can run a named operation and hand back parsed JSON.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde_json::Value;

use crate::error::GraphResult;

/// Capability the core requires from the embedding application's GraphQL
/// client. Implementations own request execution, schema introspection, and
/// websocket subscription wiring — all explicitly out of scope here.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Executes a named operation with the given variables and returns the
    /// parsed result (typically the `data` object of a GraphQL response, or
    /// a sub-object of it).
    async fn execute(&self, operation: &str, variables: Value) -> GraphResult<Value>;

    /// Subscribes to a named operation, yielding parsed results as they
    /// arrive. Optional: the default implementation reports an error,
    /// since not every transport backs a websocket.
    async fn subscribe(&self, operation: &str, _variables: Value) -> GraphResult<BoxStream<'static, GraphResult<Value>>> {
        Err(crate::error::GraphError::Transport(format!(
            "transport does not support subscriptions (operation `{operation}`)"
        )))
    }
}
