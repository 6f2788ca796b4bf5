use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use klaxon_core::{NodeKind, StageError, StageFault};

/// Everything a node handler may read for one execution.
///
/// `previous_outputs` is keyed by node id and immutable: a node may read any
/// previously executed node's output but never mutate it.
#[derive(Debug, Clone)]
pub struct NodeContext {
    pub trace_id: String,
    pub run_id: String,
    pub incident_id: Option<Uuid>,
    pub source: Option<String>,
    pub environment: String,
    pub payload: serde_json::Value,
    pub previous_outputs: HashMap<String, serde_json::Value>,
    pub deadline: Duration,
}

/// What a node hands back on success. Non-fatal errors ride along; the
/// definition engine applies the `required` policy to them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeResult {
    pub output: serde_json::Value,
    #[serde(default)]
    pub errors: Vec<StageFault>,
}

impl NodeResult {
    #[must_use]
    pub fn success(output: serde_json::Value) -> Self {
        Self {
            output,
            errors: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_errors(mut self, errors: Vec<StageFault>) -> Self {
        self.errors = errors;
        self
    }

    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// The uniform contract every node type implements.
#[async_trait]
pub trait NodeHandler: Send + Sync {
    fn kind(&self) -> NodeKind;

    /// Static validation of a node's config, run at definition admission.
    /// Returns human-readable problems; empty means valid.
    fn validate(&self, config: &serde_json::Value) -> Vec<String>;

    async fn execute(
        &self,
        ctx: &NodeContext,
        config: &serde_json::Value,
    ) -> Result<NodeResult, StageError>;
}

/// Process-wide node type registry, built at startup and immutable once
/// shared.
#[derive(Default)]
pub struct NodeRegistry {
    handlers: HashMap<NodeKind, Arc<dyn NodeHandler>>,
}

impl NodeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn NodeHandler>) {
        self.handlers.insert(handler.kind(), handler);
    }

    #[must_use]
    pub fn get(&self, kind: NodeKind) -> Option<Arc<dyn NodeHandler>> {
        self.handlers.get(&kind).cloned()
    }

    #[must_use]
    pub fn contains(&self, kind: NodeKind) -> bool {
        self.handlers.contains_key(&kind)
    }
}

impl std::fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("kinds", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullHandler(NodeKind);

    #[async_trait]
    impl NodeHandler for NullHandler {
        fn kind(&self) -> NodeKind {
            self.0
        }

        fn validate(&self, _config: &serde_json::Value) -> Vec<String> {
            Vec::new()
        }

        async fn execute(
            &self,
            _ctx: &NodeContext,
            _config: &serde_json::Value,
        ) -> Result<NodeResult, StageError> {
            Ok(NodeResult::success(serde_json::Value::Null))
        }
    }

    #[test]
    fn register_and_lookup() {
        let mut registry = NodeRegistry::new();
        registry.register(Arc::new(NullHandler(NodeKind::Transform)));
        assert!(registry.contains(NodeKind::Transform));
        assert!(!registry.contains(NodeKind::Notify));
        assert!(registry.get(NodeKind::Transform).is_some());
    }
}
