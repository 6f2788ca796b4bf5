use std::sync::Arc;

use async_trait::async_trait;
use tracing::instrument;

use klaxon_core::{StageError, StageFault};
use klaxon_notify::{DriverRegistry, build_message, dispatch_to_channels, resolve_channels};
use klaxon_store::Store;

use crate::context::StageContext;
use crate::stage::{StageExecutor, StageResult};

use super::classify_store;

/// Final stage: build a notification message from prior stage outputs and
/// dispatch it to the matching active channels.
///
/// Per-channel failures are recorded; the stage succeeds if any channel
/// succeeded, and fails only when zero deliveries succeeded and at least one
/// was attempted with a retryable error. Zero matching channels is a no-op
/// success with a recorded misconfiguration fault.
pub struct NotifyStage {
    registry: Arc<DriverRegistry>,
    store: Arc<dyn Store>,
    parallelism: usize,
}

impl NotifyStage {
    #[must_use]
    pub fn new(registry: Arc<DriverRegistry>, store: Arc<dyn Store>) -> Self {
        Self {
            registry,
            store,
            parallelism: 4,
        }
    }

    #[must_use]
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }
}

fn drivers_from_config(config: &serde_json::Value) -> Option<Vec<String>> {
    config.get("drivers").and_then(|value| {
        value.as_array().map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_owned))
                .collect()
        })
    })
}

#[async_trait]
impl StageExecutor for NotifyStage {
    fn name(&self) -> &'static str {
        "notify"
    }

    #[instrument(skip(self, ctx), fields(trace_id = %ctx.trace_id, run_id = %ctx.run_id))]
    async fn execute(&self, ctx: &StageContext) -> Result<StageResult, StageError> {
        let drivers = drivers_from_config(&ctx.stage_config);
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
        let check_output = ctx.previous_outputs.get("check");
        let recommendations = ctx
            .previous_outputs
            .get("analyze")
            .and_then(|output| output.get("recommendations"));

        let message = build_message(&ctx.trace_id, incident.as_ref(), check_output, recommendations)
            .map_err(|e| StageError::validation(format!("message build: {e}")))?;

        if channels.is_empty() {
            // Misconfiguration is visible but must not fail the run, and an
            // implicit broadcast to unrelated channels is worse.
            let output = serde_json::json!({
                "title": message.title,
                "severity": message.severity,
                "channels_attempted": 0,
                "channels_succeeded": 0,
                "deliveries": [],
            });
            return Ok(StageResult::success(output).with_errors(vec![StageFault::validation(
                "no active channels matched the configured driver set",
            )]));
        }

        let deliveries = dispatch_to_channels(
            &self.registry,
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
        Ok(StageResult::success(output).with_errors(errors))
    }
}

#[cfg(test)]
mod tests {
    use klaxon_core::{ErrorClass, NotificationChannel};
    use klaxon_notify::mock::{FailingDriver, RecordingDriver};
    use klaxon_store_memory::MemoryStore;

    use super::*;

    fn ctx(stage_config: serde_json::Value) -> StageContext {
        StageContext {
            trace_id: "trace-1".into(),
            run_id: "run-1".into(),
            incident_id: None,
            source: None,
            environment: "test".into(),
            payload: serde_json::Value::Null,
            previous_outputs: std::collections::HashMap::new(),
            stage_config,
            deadline: std::time::Duration::from_secs(5),
        }
    }

    async fn store_with_channels(channels: &[NotificationChannel]) -> Arc<dyn Store> {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        for channel in channels {
            store.insert_channel(channel).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn partial_failure_still_succeeds() {
        // Three channels, one succeeds, two fail: stage succeeds with the
        // two failures recorded.
        let mut registry = DriverRegistry::new();
        registry.register(Arc::new(RecordingDriver::new("slack")));
        registry.register(Arc::new(FailingDriver::retryable("email")));
        registry.register(Arc::new(FailingDriver::fatal("pagerduty")));

        let store = store_with_channels(&[
            NotificationChannel::new("c1", "slack", serde_json::json!({})),
            NotificationChannel::new("c2", "email", serde_json::json!({})),
            NotificationChannel::new("c3", "pagerduty", serde_json::json!({})),
        ])
        .await;

        let stage = NotifyStage::new(Arc::new(registry), store);
        let result = stage.execute(&ctx(serde_json::Value::Null)).await.unwrap();

        assert_eq!(result.output["channels_attempted"], 3);
        assert_eq!(result.output["channels_succeeded"], 1);
        assert_eq!(result.errors.len(), 2);
    }

    #[tokio::test]
    async fn zero_matching_channels_is_noop_success() {
        let registry = DriverRegistry::new();
        let store = store_with_channels(&[NotificationChannel::new(
            "c1",
            "slack",
            serde_json::json!({}),
        )])
        .await;

        let stage = NotifyStage::new(Arc::new(registry), store);
        let result = stage
            .execute(&ctx(serde_json::json!({"drivers": ["pagerduty"]})))
            .await
            .unwrap();

        assert_eq!(result.output["channels_attempted"], 0);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].message.contains("no active channels"));
    }

    #[tokio::test]
    async fn all_retryable_failures_fail_the_stage() {
        let mut registry = DriverRegistry::new();
        registry.register(Arc::new(FailingDriver::retryable("email")));

        let store = store_with_channels(&[NotificationChannel::new(
            "c1",
            "email",
            serde_json::json!({}),
        )])
        .await;

        let stage = NotifyStage::new(Arc::new(registry), store);
        let err = stage
            .execute(&ctx(serde_json::Value::Null))
            .await
            .unwrap_err();
        assert_eq!(err.class, ErrorClass::Transient);
        assert!(err.retryable);
    }

    #[tokio::test]
    async fn all_fatal_failures_succeed_with_faults() {
        let mut registry = DriverRegistry::new();
        registry.register(Arc::new(FailingDriver::fatal("email")));

        let store = store_with_channels(&[NotificationChannel::new(
            "c1",
            "email",
            serde_json::json!({}),
        )])
        .await;

        let stage = NotifyStage::new(Arc::new(registry), store);
        let result = stage.execute(&ctx(serde_json::Value::Null)).await.unwrap();
        assert_eq!(result.output["channels_succeeded"], 0);
        assert_eq!(result.errors.len(), 1);
    }
}
