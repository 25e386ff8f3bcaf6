//! Test tooling (SPEC_FULL §10): a scripted, recording `Transport` for
//! exercising the store and relationship engine without a live endpoint.
//!
//! Grounded in the teacher's test doubles for its repository trait
//! (scripted-response stand-ins recorded by call) adapted to the
//! `Transport` contract.

use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{GraphError, GraphResult};
use crate::transport::Transport;

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub operation: String,
    pub variables: Value,
}

/// A `Transport` whose responses are pre-scripted per operation name, in
/// call order, and which records every call it receives for later
/// assertion.
pub struct StubTransport {
    scripts: Mutex<std::collections::HashMap<String, std::collections::VecDeque<GraphResult<Value>>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl Default for StubTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl StubTransport {
    pub fn new() -> Self {
        StubTransport {
            scripts: Mutex::new(std::collections::HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queues `response` to be returned the next time `operation` is
    /// called. Multiple calls for the same operation are served FIFO.
    pub fn script(&self, operation: &str, response: Value) -> &Self {
        self.scripts
            .lock()
            .expect("stub transport poisoned")
            .entry(operation.to_string())
            .or_default()
            .push_back(Ok(response));
        self
    }

    /// Queues an error response for the next call to `operation`.
    pub fn script_error(&self, operation: &str, message: &str) -> &Self {
        self.scripts
            .lock()
            .expect("stub transport poisoned")
            .entry(operation.to_string())
            .or_default()
            .push_back(Err(GraphError::Transport(message.to_string())));
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().expect("stub transport poisoned").clone()
    }

    pub fn call_count(&self, operation: &str) -> usize {
        self.calls().iter().filter(|c| c.operation == operation).count()
    }
}

#[async_trait]
impl Transport for StubTransport {
    async fn execute(&self, operation: &str, variables: Value) -> GraphResult<Value> {
        self.calls.lock().expect("stub transport poisoned").push(RecordedCall {
            operation: operation.to_string(),
            variables: variables.clone(),
        });
        let mut scripts = self.scripts.lock().expect("stub transport poisoned");
        match scripts.get_mut(operation).and_then(|queue| queue.pop_front()) {
            Some(result) => result,
            None => Err(GraphError::Transport(format!(
                "no scripted response for operation `{operation}`"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_scripted_responses_in_order() {
        let transport = StubTransport::new();
        transport.script("GetScene", serde_json::json!({"id": "1"}));
        transport.script("GetScene", serde_json::json!({"id": "2"}));

        let first = transport.execute("GetScene", Value::Null).await.unwrap();
        let second = transport.execute("GetScene", Value::Null).await.unwrap();
        assert_eq!(first["id"], "1");
        assert_eq!(second["id"], "2");
        assert_eq!(transport.call_count("GetScene"), 2);
    }

    #[tokio::test]
    async fn reports_missing_script_as_error() {
        let transport = StubTransport::new();
        assert!(transport.execute("Unscripted", Value::Null).await.is_err());
    }

    #[tokio::test]
    async fn replays_scripted_errors() {
        let transport = StubTransport::new();
        transport.script_error("GetScene", "boom");
        let err = transport.execute("GetScene", Value::Null).await.unwrap_err();
        assert!(matches!(err, GraphError::Transport(_)));
    }
}
