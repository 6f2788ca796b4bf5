use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use klaxon_core::{
    NodeKind, PipelineRun, RunStatus, StageError, StageExecution, StageFault, StageStatus,
};
use klaxon_store::Store;

use crate::context::extract_incident_id;
use crate::error::PipelineError;
use crate::node::{NodeContext, NodeRegistry, NodeResult};
use crate::plan::{ExecutionPlan, PlannedNode, SkipCondition, compile};
use crate::retry::RetryPolicy;

/// One submission to the definition engine.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecuteRequest {
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub environment: Option<String>,
    #[serde(default)]
    pub incident_id: Option<Uuid>,
}

/// What the caller gets back from a definition execution.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub run_id: String,
    pub trace_id: String,
    pub status: RunStatus,
    pub executed_nodes: Vec<String>,
    pub skipped_nodes: Vec<String>,
    pub node_results: HashMap<String, NodeResult>,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// The `stage` column records the node type truncated to 20 characters.
fn stage_label(kind: NodeKind) -> String {
    let label = kind.as_str();
    label.chars().take(20).collect()
}

/// The definition-driven orchestrator.
///
/// Executes a compiled [`ExecutionPlan`] node by node in declared order
/// (`next` is informational), with per-node retry and skip policies. Each
/// node attempt is persisted as a `StageExecution` row whose idempotency key
/// hashes the node id. Unlike the fixed-topology engine, definition runs are
/// not resumable.
pub struct DefinitionEngine {
    store: Arc<dyn Store>,
    registry: Arc<NodeRegistry>,
    retry: RetryPolicy,
    environment: String,
}

impl DefinitionEngine {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, registry: Arc<NodeRegistry>) -> Self {
        Self {
            store,
            registry,
            retry: RetryPolicy::default(),
            environment: "production".to_owned(),
        }
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// Validate a definition config without persisting or executing it.
    #[must_use]
    pub fn validate(&self, config: &klaxon_core::DefinitionConfig) -> Vec<String> {
        crate::plan::validate(config, &self.registry)
    }

    /// Execute the named definition against one payload.
    #[instrument(skip(self, request), fields(definition = name))]
    pub async fn execute(
        &self,
        name: &str,
        request: ExecuteRequest,
    ) -> Result<ExecutionReport, PipelineError> {
        let definition = self
            .store
            .get_definition(name)
            .await?
            .ok_or_else(|| PipelineError::DefinitionNotFound(name.to_owned()))?;
        if !definition.is_active {
            return Err(PipelineError::DefinitionInactive(name.to_owned()));
        }
        let plan = compile(&definition.config, &self.registry)
            .map_err(PipelineError::DefinitionInvalid)?;

        let mut run = PipelineRun::new(
            request.source.clone(),
            request
                .environment
                .clone()
                .unwrap_or_else(|| self.environment.clone()),
        );
        if let Some(trace_id) = &request.trace_id {
            run.trace_id.clone_from(trace_id);
        }
        run.max_retries = plan.defaults.max_retries;
        run.incident_id = request.incident_id;
        run.started_at = Some(Utc::now());
        self.store.insert_run(&run).await?;
        info!(run_id = %run.run_id, trace_id = %run.trace_id, nodes = plan.nodes.len(), "definition run started");

        let started = Instant::now();
        let mut previous_outputs: HashMap<String, serde_json::Value> = HashMap::new();
        let mut node_results: HashMap<String, NodeResult> = HashMap::new();
        let mut executed_nodes = Vec::new();
        let mut skipped_nodes = Vec::new();
        let mut run_error: Option<String> = None;

        'nodes: for node in &plan.nodes {
            let node_id = node.spec.id.clone();

            if let Some(reason) = skip_reason(node, &node_results) {
                debug!(run_id = %run.run_id, node = %node_id, reason = %reason, "node skipped");
                let mut execution = StageExecution::pending_keyed(
                    &run.run_id,
                    stage_label(node.spec.kind),
                    &node_id,
                    1,
                );
                execution.status = StageStatus::Skipped;
                execution.completed_at = Some(Utc::now());
                execution.output_snapshot = Some(serde_json::json!({
                    "skipped": true,
                    "skip_reason": reason,
                }));
                self.store.insert_stage_execution(&execution).await?;
                skipped_nodes.push(node_id);
                continue;
            }

            let budget = node.max_retries.min(run.max_retries);
            let mut attempt = 1u32;

            loop {
                let mut execution = StageExecution::pending_keyed(
                    &run.run_id,
                    stage_label(node.spec.kind),
                    &node_id,
                    attempt,
                );
                self.store.insert_stage_execution(&execution).await?;
                execution.status = StageStatus::Running;
                execution.started_at = Some(Utc::now());
                self.store.update_stage_execution(&execution).await?;

                run.current_stage = Some(stage_label(node.spec.kind));
                self.store.update_run(&run).await?;

                let handler = self.registry.get(node.spec.kind).ok_or_else(|| {
                    // compile() verified registration; a miss here means the
                    // registry changed under us.
                    PipelineError::DefinitionInvalid(vec![format!(
                        "node '{node_id}': type '{}' no longer registered",
                        node.spec.kind
                    )])
                })?;

                let ctx = NodeContext {
                    trace_id: run.trace_id.clone(),
                    run_id: run.run_id.clone(),
                    incident_id: run.incident_id,
                    source: run.source.clone(),
                    environment: run.environment.clone(),
                    payload: request.payload.clone(),
                    previous_outputs: previous_outputs.clone(),
                    deadline: node.timeout,
                };

                debug!(run_id = %run.run_id, node = %node_id, attempt, "executing node");
                let node_started = Instant::now();
                let outcome =
                    match tokio::time::timeout(node.timeout, handler.execute(&ctx, &node.spec.config))
                        .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(StageError::timeout(node.timeout)),
                    };
                let duration_ms =
                    u64::try_from(node_started.elapsed().as_millis()).unwrap_or(u64::MAX);
                execution.completed_at = Some(Utc::now());
                execution.duration_ms = Some(duration_ms);

                match outcome {
                    Ok(result) => {
                        execution.output_snapshot = Some(result.output.clone());
                        if result.has_errors() {
                            execution.error_type = Some("partial_failure".to_owned());
                            execution.error_message = Some(
                                result
                                    .errors
                                    .iter()
                                    .map(|f| f.message.clone())
                                    .collect::<Vec<_>>()
                                    .join("; "),
                            );
                            execution.error_retryable = Some(false);
                        }
                        execution.status = StageStatus::Succeeded;
                        self.store.update_stage_execution(&execution).await?;

                        if let Some(incident_id) = extract_incident_id(&result.output) {
                            run.incident_id = Some(incident_id);
                            self.store.update_run(&run).await?;
                        }

                        previous_outputs.insert(node_id.clone(), result.output.clone());
                        node_results.insert(node_id.clone(), result);
                        executed_nodes.push(node_id);
                        break;
                    }
                    Err(stage_error) => {
                        execution.status = StageStatus::Failed;
                        execution.error_type = Some(stage_error.error_type().to_owned());
                        execution.error_message = Some(stage_error.message.clone());
                        execution.error_retryable = Some(stage_error.retryable);
                        self.store.update_stage_execution(&execution).await?;

                        run.total_attempts += 1;
                        run.last_error_type = Some(stage_error.error_type().to_owned());
                        run.last_error_message = Some(stage_error.message.clone());
                        run.last_error_retryable = Some(stage_error.retryable);

                        if stage_error.retryable && attempt <= budget {
                            run.status = RunStatus::Retrying;
                            self.store.update_run(&run).await?;
                            let delay = self.retry.delay_for(attempt);
                            warn!(
                                run_id = %run.run_id,
                                node = %node_id,
                                attempt,
                                delay_ms = %delay.as_millis(),
                                error = %stage_error,
                                "retryable node failure, backing off"
                            );
                            tokio::time::sleep(delay).await;
                            attempt += 1;
                            continue;
                        }

                        // Exhausted (or fatal): the node is done. It still
                        // counts as executed, with its errors in the report.
                        node_results.insert(
                            node_id.clone(),
                            NodeResult {
                                output: serde_json::Value::Null,
                                errors: vec![StageFault {
                                    class: stage_error.class,
                                    message: stage_error.message.clone(),
                                    retryable: stage_error.retryable,
                                }],
                            },
                        );
                        executed_nodes.push(node_id.clone());

                        if node.spec.required {
                            run_error = Some(format!(
                                "required node '{node_id}' failed: {}",
                                stage_error.message
                            ));
                            break 'nodes;
                        }
                        warn!(
                            run_id = %run.run_id,
                            node = %node_id,
                            error = %stage_error,
                            "non-required node failed, continuing"
                        );
                        break;
                    }
                }
            }
        }

        run.status = if run_error.is_some() {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };
        run.current_stage = None;
        run.completed_at = Some(Utc::now());
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        run.total_duration_ms = Some(duration_ms);
        self.store.update_run(&run).await?;
        info!(run_id = %run.run_id, status = %run.status, "definition run finished");

        Ok(ExecutionReport {
            run_id: run.run_id,
            trace_id: run.trace_id,
            status: run.status,
            executed_nodes,
            skipped_nodes,
            node_results,
            duration_ms,
            error: run_error,
        })
    }
}

/// Evaluate the node's skip policies against prior results. Nodes that were
/// skipped (no result) count as error-free.
fn skip_reason(node: &PlannedNode, results: &HashMap<String, NodeResult>) -> Option<String> {
    for watched in &node.spec.skip_if_errors {
        if results.get(watched).is_some_and(NodeResult::has_errors) {
            return Some(format!("node '{watched}' reported errors"));
        }
    }
    if let Some(SkipCondition::HasErrors(watched)) = &node.skip_condition
        && results.get(watched).is_some_and(NodeResult::has_errors)
    {
        return Some(format!("condition: node '{watched}' has errors"));
    }
    None
}
