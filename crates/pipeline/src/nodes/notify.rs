use std::sync::Arc;

use async_trait::async_trait;

use klaxon_core::{NodeKind, StageError, StageFault};
use klaxon_notify::{DriverRegistry, build_message, dispatch_to_channels, resolve_channels};
use klaxon_store::Store;

use crate::node::{NodeContext, NodeHandler, NodeResult};
use crate::stages::classify_store;

use super::expect_string_array;

/// Node that dispatches a notification built from preceding node outputs.
///
/// The check summary and recommendations are discovered by shape: the first
/// prior output carrying `checks_run` feeds the body's check section, the
/// first carrying `recommendations` feeds the recommendation list.
pub struct NotifyNode {
    drivers: Arc<DriverRegistry>,
    store: Arc<dyn Store>,
    parallelism: usize,
}

impl NotifyNode {
    #[must_use]
    pub fn new(drivers: Arc<DriverRegistry>, store: Arc<dyn Store>) -> Self {
        Self {
            drivers,
            store,
            parallelism: 4,
        }
    }
}

fn find_by_key<'a>(
    outputs: &'a std::collections::HashMap<String, serde_json::Value>,
    key: &str,
) -> Option<&'a serde_json::Value> {
    // HashMap iteration order is arbitrary; sort by node id for a stable
    // pick when several outputs carry the key.
    let mut ids: Vec<&String> = outputs.keys().collect();
    ids.sort();
    ids.into_iter()
        .map(|id| &outputs[id])
        .find(|output| output.get(key).is_some())
}

#[async_trait]
impl NodeHandler for NotifyNode {
    fn kind(&self) -> NodeKind {
        NodeKind::Notify
    }

    fn validate(&self, config: &serde_json::Value) -> Vec<String> {
        let mut errors = Vec::new();
        expect_string_array(config, "drivers", &mut errors);
        errors
    }

    async fn execute(
        &self,
        ctx: &NodeContext,
        config: &serde_json::Value,
    ) -> Result<NodeResult, StageError> {
        let drivers: Option<Vec<String>> = config.get("drivers").and_then(|value| {
            value.as_array().map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.as_str().map(str::to_owned))
                    .collect()
            })
        });

        let active = self
            .store
            .list_active_channels()
            .await
            .map_err(|e| classify_store(&e))?;
        let channels = resolve_channels(active, drivers.as_deref());

        let incident = match ctx.incident_id {
            Some(id) => self
                .store
                .get_incident(id)
                .await
                .map_err(|e| classify_store(&e))?,
            None => None,
        };
        let check_output = find_by_key(&ctx.previous_outputs, "checks_run");
        let recommendations = find_by_key(&ctx.previous_outputs, "recommendations")
            .and_then(|output| output.get("recommendations"));

        let message = build_message(&ctx.trace_id, incident.as_ref(), check_output, recommendations)
            .map_err(|e| StageError::validation(format!("message build: {e}")))?;

        if channels.is_empty() {
            let output = serde_json::json!({
                "title": message.title,
                "channels_attempted": 0,
                "channels_succeeded": 0,
                "deliveries": [],
            });
            return Ok(NodeResult::success(output).with_errors(vec![StageFault::validation(
                "no active channels matched the configured driver set",
            )]));
        }

        let deliveries = dispatch_to_channels(
            &self.drivers,
            &channels,
            &message,
            self.parallelism,
            ctx.deadline,
        )
        .await;

        let attempted = deliveries.len();
        let succeeded = deliveries.iter().filter(|d| d.success).count();
        let any_retryable = deliveries.iter().any(|d| !d.success && d.retryable);

        if succeeded == 0 && attempted > 0 && any_retryable {
            return Err(StageError::transient(format!(
                "all {attempted} deliveries failed"
            )));
        }

        let errors: Vec<StageFault> = deliveries
            .iter()
            .filter(|d| !d.success)
            .map(|d| {
                StageFault::partial(format!(
                    "channel {} ({}): {}",
                    d.channel,
                    d.driver,
                    d.error.as_deref().unwrap_or("delivery failed")
                ))
            })
            .collect();

        let output = serde_json::json!({
            "title": message.title,
            "severity": message.severity,
            "channels_attempted": attempted,
            "channels_succeeded": succeeded,
            "deliveries": deliveries,
        });
        Ok(NodeResult::success(output).with_errors(errors))
    }
}

#[cfg(test)]
mod tests {
    use klaxon_core::NotificationChannel;
    use klaxon_notify::mock::RecordingDriver;
    use klaxon_store_memory::MemoryStore;

    use super::*;

    #[tokio::test]
    async fn builds_body_from_prior_outputs() {
        let recording = Arc::new(RecordingDriver::new("slack"));
        let mut registry = DriverRegistry::new();
        registry.register(Arc::clone(&recording) as Arc<dyn klaxon_notify::NotifyDriver>);

        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        store
            .insert_channel(&NotificationChannel::new("ops", "slack", serde_json::json!({})))
            .await
            .unwrap();

        let mut previous_outputs = std::collections::HashMap::new();
        previous_outputs.insert(
            "ctx".to_owned(),
            serde_json::json!({
                "checks_run": 3, "checks_passed": 1, "critical": 2, "warning": 0, "unknown": 0
            }),
        );
        previous_outputs.insert(
            "brain".to_owned(),
            serde_json::json!({
                "recommendations": [
                    {"title": "Restart db", "description": "wedged", "priority": "high"}
                ]
            }),
        );

        let ctx = NodeContext {
            trace_id: "trace-1".into(),
            run_id: "run-1".into(),
            incident_id: None,
            source: None,
            environment: "test".into(),
            payload: serde_json::Value::Null,
            previous_outputs,
            deadline: std::time::Duration::from_secs(5),
        };

        let node = NotifyNode::new(Arc::new(registry), store);
        let result = node.execute(&ctx, &serde_json::Value::Null).await.unwrap();

        assert_eq!(result.output["channels_succeeded"], 1);
        let delivered = recording.deliveries();
        assert_eq!(delivered.len(), 1);
        assert!(delivered[0].body.contains("1/3 passed"));
        assert!(delivered[0].body.contains("Restart db"));
    }

    #[test]
    fn validate_drivers_shape() {
        let node = NotifyNode::new(Arc::new(DriverRegistry::new()), Arc::new(MemoryStore::new()));
        assert!(node.validate(&serde_json::json!({"drivers": ["slack"]})).is_empty());
        assert_eq!(node.validate(&serde_json::json!({"drivers": "slack"})).len(), 1);
    }
}
