use std::sync::Arc;

use async_trait::async_trait;
use tracing::instrument;

use klaxon_check::{CheckerRegistry, run_checkers};
use klaxon_core::StageError;
use klaxon_store::Store;

use crate::context::StageContext;
use crate::stage::{StageExecutor, StageResult};

use super::classify_store;

/// Second stage: run the configured checker set and aggregate diagnostics.
///
/// Individual checker failures are recorded but do not fail the stage; the
/// stage fails only when zero checkers could run at all.
pub struct CheckStage {
    registry: Arc<CheckerRegistry>,
    store: Arc<dyn Store>,
    hostname: String,
    parallelism: usize,
}

impl CheckStage {
    #[must_use]
    pub fn new(
        registry: Arc<CheckerRegistry>,
        store: Arc<dyn Store>,
        hostname: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            store,
            hostname: hostname.into(),
            parallelism: 4,
        }
    }

    #[must_use]
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }
}

fn include_from_config(config: &serde_json::Value) -> Option<Vec<String>> {
    config.get("include").and_then(|value| {
        value.as_array().map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_owned))
                .collect()
        })
    })
}

#[async_trait]
impl StageExecutor for CheckStage {
    fn name(&self) -> &'static str {
        "check"
    }

    #[instrument(skip(self, ctx), fields(trace_id = %ctx.trace_id, run_id = %ctx.run_id))]
    async fn execute(&self, ctx: &StageContext) -> Result<StageResult, StageError> {
        let include = include_from_config(&ctx.stage_config);
        let summary = run_checkers(
            &self.registry,
            &self.store,
            include.as_deref(),
            self.parallelism,
            ctx.deadline,
            &ctx.trace_id,
            &self.hostname,
        )
        .await
        .map_err(|e| classify_store(&e))?;

        if summary.checks_requested == 0 {
            return Err(StageError::validation(
                "no checkers enabled or matched by the include list",
            ));
        }
        if summary.checks_run == 0 {
            return Err(StageError::transient(format!(
                "all {} checkers failed to run",
                summary.checks_requested
            )));
        }

        let errors = summary.errors.clone();
        let output = serde_json::to_value(&summary)
            .map_err(|e| StageError::catastrophic(format!("check summary: {e}")))?;
        Ok(StageResult::success(output).with_errors(errors))
    }
}

#[cfg(test)]
mod tests {
    use klaxon_check::mock::{FailingChecker, StaticChecker};
    use klaxon_core::ErrorClass;
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

    fn stage(registry: CheckerRegistry) -> CheckStage {
        CheckStage::new(Arc::new(registry), Arc::new(MemoryStore::new()), "web-01")
    }

    #[tokio::test]
    async fn aggregates_and_tolerates_single_failures() {
        let mut registry = CheckerRegistry::new();
        registry.register(Arc::new(StaticChecker::ok("cpu")));
        registry.register(Arc::new(FailingChecker::new("disk")));

        let result = stage(registry)
            .execute(&ctx(serde_json::Value::Null))
            .await
            .unwrap();
        assert_eq!(result.output["checks_run"], 1);
        assert_eq!(result.output["checks_passed"], 1);
        assert_eq!(result.errors.len(), 1, "disk failure recorded");
    }

    #[tokio::test]
    async fn empty_registry_fails_validation() {
        let err = stage(CheckerRegistry::new())
            .execute(&ctx(serde_json::Value::Null))
            .await
            .unwrap_err();
        assert_eq!(err.class, ErrorClass::Validation);
    }

    #[tokio::test]
    async fn all_probes_failing_is_transient() {
        let mut registry = CheckerRegistry::new();
        registry.register(Arc::new(FailingChecker::new("a")));
        registry.register(Arc::new(FailingChecker::new("b")));

        let err = stage(registry)
            .execute(&ctx(serde_json::Value::Null))
            .await
            .unwrap_err();
        assert_eq!(err.class, ErrorClass::Transient);
        assert!(err.retryable);
    }

    #[tokio::test]
    async fn include_config_selects() {
        let mut registry = CheckerRegistry::new();
        registry.register(Arc::new(StaticChecker::ok("cpu")));
        registry.register(Arc::new(StaticChecker::ok("memory")));

        let result = stage(registry)
            .execute(&ctx(serde_json::json!({"include": ["cpu"]})))
            .await
            .unwrap();
        assert_eq!(result.output["checks_requested"], 1);
    }
}
