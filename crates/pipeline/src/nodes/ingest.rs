use std::sync::Arc;

use async_trait::async_trait;

use klaxon_core::{NodeKind, StageError};
use klaxon_ingest::Normalizer;

use crate::node::{NodeContext, NodeHandler, NodeResult};
use crate::stages::classify_ingest;

use super::expect_string;

/// Node wrapper around the alert normalizer. Its output carries
/// `incident_id`, which the engine hoists into the shared context for
/// downstream nodes.
pub struct IngestNode {
    normalizer: Arc<Normalizer>,
}

impl IngestNode {
    #[must_use]
    pub fn new(normalizer: Arc<Normalizer>) -> Self {
        Self { normalizer }
    }
}

#[async_trait]
impl NodeHandler for IngestNode {
    fn kind(&self) -> NodeKind {
        NodeKind::Ingest
    }

    fn validate(&self, config: &serde_json::Value) -> Vec<String> {
        let mut errors = Vec::new();
        expect_string(config, "source", &mut errors);
        errors
    }

    async fn execute(
        &self,
        ctx: &NodeContext,
        config: &serde_json::Value,
    ) -> Result<NodeResult, StageError> {
        let source = config
            .get("source")
            .and_then(serde_json::Value::as_str)
            .or(ctx.source.as_deref());

        let result = self
            .normalizer
            .ingest(ctx.payload.clone(), source)
            .await
            .map_err(|e| classify_ingest(&e))?;

        let errors = result.errors.clone();
        let output = serde_json::to_value(&result)
            .map_err(|e| StageError::catastrophic(format!("ingest result: {e}")))?;
        Ok(NodeResult::success(output).with_errors(errors))
    }
}

#[cfg(test)]
mod tests {
    use klaxon_store::Store;
    use klaxon_store_memory::{MemoryFingerprintLock, MemoryStore};

    use super::*;

    fn node() -> IngestNode {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        IngestNode::new(Arc::new(Normalizer::new(
            store,
            Arc::new(MemoryFingerprintLock::new()),
            Arc::new(klaxon_ingest::default_registry()),
        )))
    }

    fn ctx(payload: serde_json::Value) -> NodeContext {
        NodeContext {
            trace_id: "trace-1".into(),
            run_id: "run-1".into(),
            incident_id: None,
            source: None,
            environment: "test".into(),
            payload,
            previous_outputs: std::collections::HashMap::new(),
            deadline: std::time::Duration::from_secs(5),
        }
    }

    #[test]
    fn validate_source_type() {
        let node = node();
        assert!(node.validate(&serde_json::json!({})).is_empty());
        assert!(node.validate(&serde_json::json!({"source": "zabbix"})).is_empty());
        assert_eq!(node.validate(&serde_json::json!({"source": 42})).len(), 1);
    }

    #[tokio::test]
    async fn executes_normalizer_and_reports_incident() {
        let node = node();
        let payload = serde_json::json!({
            "alerts": [{"status": "firing", "labels": {"alertname": "X", "severity": "warning"}}]
        });
        let result = node
            .execute(&ctx(payload), &serde_json::Value::Null)
            .await
            .unwrap();
        assert_eq!(result.output["alerts_created"], 1);
        assert!(result.output["incident_id"].is_string());
    }

    #[tokio::test]
    async fn config_source_overrides_context() {
        let node = node();
        let payload = serde_json::json!({
            "alerts": [{"status": "firing", "labels": {"alertname": "X"}}]
        });
        let result = node
            .execute(&ctx(payload), &serde_json::json!({"source": "generic"}))
            .await
            .unwrap();
        assert_eq!(result.output["source"], "generic");
    }
}
