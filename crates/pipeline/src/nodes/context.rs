use std::sync::Arc;

use async_trait::async_trait;

use klaxon_check::{CheckerRegistry, run_checkers};
use klaxon_core::{NodeKind, StageError};
use klaxon_store::Store;

use crate::node::{NodeContext, NodeHandler, NodeResult};
use crate::stages::classify_store;

use super::expect_string_array;

/// Node that gathers local diagnostics by running a checker set.
///
/// Output: `{checks_run, checks_passed, checks_failed, results: {name ->
/// CheckResult}, ...}`. Individual checker failures never fail the node.
pub struct ContextNode {
    checkers: Arc<CheckerRegistry>,
    store: Arc<dyn Store>,
    hostname: String,
    parallelism: usize,
}

impl ContextNode {
    #[must_use]
    pub fn new(
        checkers: Arc<CheckerRegistry>,
        store: Arc<dyn Store>,
        hostname: impl Into<String>,
    ) -> Self {
        Self {
            checkers,
            store,
            hostname: hostname.into(),
            parallelism: 4,
        }
    }
}

#[async_trait]
impl NodeHandler for ContextNode {
    fn kind(&self) -> NodeKind {
        NodeKind::Context
    }

    fn validate(&self, config: &serde_json::Value) -> Vec<String> {
        let mut errors = Vec::new();
        expect_string_array(config, "include", &mut errors);
        errors
    }

    async fn execute(
        &self,
        ctx: &NodeContext,
        config: &serde_json::Value,
    ) -> Result<NodeResult, StageError> {
        let include: Option<Vec<String>> = config.get("include").and_then(|value| {
            value.as_array().map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.as_str().map(str::to_owned))
                    .collect()
            })
        });

        let summary = run_checkers(
            &self.checkers,
            &self.store,
            include.as_deref(),
            self.parallelism,
            ctx.deadline,
            &ctx.trace_id,
            &self.hostname,
        )
        .await
        .map_err(|e| classify_store(&e))?;

        if summary.checks_requested > 0 && summary.checks_run == 0 {
            return Err(StageError::transient(format!(
                "all {} checkers failed to run",
                summary.checks_requested
            )));
        }

        let errors = summary.errors.clone();
        let output = serde_json::to_value(&summary)
            .map_err(|e| StageError::catastrophic(format!("check summary: {e}")))?;
        Ok(NodeResult::success(output).with_errors(errors))
    }
}
