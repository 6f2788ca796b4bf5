use async_trait::async_trait;

use klaxon_core::{NodeKind, StageError, extract_path};

use crate::node::{NodeContext, NodeHandler, NodeResult};

use super::expect_string;

/// Pure projection/filter over another node's output.
///
/// Config: `source_node` (required), `extract` (dotted path into the source
/// output), `filter_priority` (retains array elements whose `priority` field
/// equals the value), `mapping` (object of `target -> dotted source path`).
/// Applied in that order.
pub struct TransformNode;

#[async_trait]
impl NodeHandler for TransformNode {
    fn kind(&self) -> NodeKind {
        NodeKind::Transform
    }

    fn validate(&self, config: &serde_json::Value) -> Vec<String> {
        let mut errors = Vec::new();
        match config.get("source_node").and_then(serde_json::Value::as_str) {
            Some(id) if !id.trim().is_empty() => {}
            Some(_) => errors.push("`source_node` must not be empty".to_owned()),
            None => errors.push("`source_node` is required".to_owned()),
        }
        expect_string(config, "extract", &mut errors);
        expect_string(config, "filter_priority", &mut errors);
        if let Some(mapping) = config.get("mapping")
            && !mapping
                .as_object()
                .is_some_and(|map| map.values().all(serde_json::Value::is_string))
        {
            errors.push("`mapping` must be an object of target -> dotted path strings".to_owned());
        }
        errors
    }

    async fn execute(
        &self,
        ctx: &NodeContext,
        config: &serde_json::Value,
    ) -> Result<NodeResult, StageError> {
        let source_node = config
            .get("source_node")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| StageError::validation("transform config has no source_node"))?;
        let source = ctx.previous_outputs.get(source_node).ok_or_else(|| {
            StageError::validation(format!(
                "source node '{source_node}' has no output in this run"
            ))
        })?;

        let mut value = match config.get("extract").and_then(serde_json::Value::as_str) {
            Some(path) => extract_path(source, path)
                .cloned()
                .unwrap_or(serde_json::Value::Null),
            None => source.clone(),
        };

        if let Some(priority) = config
            .get("filter_priority")
            .and_then(serde_json::Value::as_str)
            && let serde_json::Value::Array(items) = &value
        {
            let filtered: Vec<serde_json::Value> = items
                .iter()
                .filter(|item| {
                    item.get("priority")
                        .and_then(serde_json::Value::as_str)
                        .is_some_and(|p| p == priority)
                })
                .cloned()
                .collect();
            value = serde_json::Value::Array(filtered);
        }

        if let Some(serde_json::Value::Object(mapping)) = config.get("mapping") {
            let mut projected = serde_json::Map::new();
            for (target, path) in mapping {
                let Some(path) = path.as_str() else { continue };
                projected.insert(
                    target.clone(),
                    extract_path(&value, path)
                        .cloned()
                        .unwrap_or(serde_json::Value::Null),
                );
            }
            value = serde_json::Value::Object(projected);
        }

        Ok(NodeResult::success(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx_with(source_id: &str, output: serde_json::Value) -> NodeContext {
        let mut previous_outputs = std::collections::HashMap::new();
        previous_outputs.insert(source_id.to_owned(), output);
        NodeContext {
            trace_id: "trace-1".into(),
            run_id: "run-1".into(),
            incident_id: None,
            source: None,
            environment: "test".into(),
            payload: serde_json::Value::Null,
            previous_outputs,
            deadline: std::time::Duration::from_secs(5),
        }
    }

    #[test]
    fn validate_requires_source_node() {
        let node = TransformNode;
        assert_eq!(node.validate(&serde_json::json!({})).len(), 1);
        assert!(node.validate(&serde_json::json!({"source_node": "a"})).is_empty());
        assert_eq!(
            node.validate(&serde_json::json!({"source_node": "a", "mapping": {"x": 1}}))
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn extract_projects_a_path() {
        let node = TransformNode;
        let ctx = ctx_with("brain", serde_json::json!({"analysis": {"score": 7}}));
        let result = node
            .execute(
                &ctx,
                &serde_json::json!({"source_node": "brain", "extract": "analysis.score"}),
            )
            .await
            .unwrap();
        assert_eq!(result.output, serde_json::json!(7));
    }

    #[tokio::test]
    async fn filter_priority_keeps_matching_elements() {
        let node = TransformNode;
        let ctx = ctx_with(
            "brain",
            serde_json::json!({"recommendations": [
                {"title": "a", "priority": "high"},
                {"title": "b", "priority": "low"},
                {"title": "c", "priority": "high"}
            ]}),
        );
        let result = node
            .execute(
                &ctx,
                &serde_json::json!({
                    "source_node": "brain",
                    "extract": "recommendations",
                    "filter_priority": "high"
                }),
            )
            .await
            .unwrap();
        let items = result.output.as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["title"], "a");
    }

    #[tokio::test]
    async fn mapping_builds_object() {
        let node = TransformNode;
        let ctx = ctx_with(
            "ctx",
            serde_json::json!({"checks_run": 4, "results": {"cpu": {"status": "ok"}}}),
        );
        let result = node
            .execute(
                &ctx,
                &serde_json::json!({
                    "source_node": "ctx",
                    "mapping": {"total": "checks_run", "cpu_status": "results.cpu.status"}
                }),
            )
            .await
            .unwrap();
        assert_eq!(result.output["total"], 4);
        assert_eq!(result.output["cpu_status"], "ok");
    }

    #[tokio::test]
    async fn missing_source_is_a_validation_error() {
        let node = TransformNode;
        let ctx = ctx_with("other", serde_json::json!({}));
        let err = node
            .execute(&ctx, &serde_json::json!({"source_node": "missing"}))
            .await
            .unwrap_err();
        assert!(!err.retryable);
    }

    #[tokio::test]
    async fn missing_extract_path_yields_null() {
        let node = TransformNode;
        let ctx = ctx_with("a", serde_json::json!({"x": 1}));
        let result = node
            .execute(
                &ctx,
                &serde_json::json!({"source_node": "a", "extract": "nope.deeper"}),
            )
            .await
            .unwrap();
        assert!(result.output.is_null());
    }
}
