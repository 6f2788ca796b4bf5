use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use klaxon_core::{
    PipelineRun, RunStatus, StageError, StageExecution, StageStatus,
};
use klaxon_store::{Store, StoreError};

use crate::context::{StageContext, extract_incident_id};
use crate::error::PipelineError;
use crate::retry::RetryPolicy;
use crate::stage::StageExecutor;

/// Outputs up to this many serialized bytes are persisted inline in
/// `output_snapshot`; larger ones go to the blob store under `output_ref`.
const INLINE_SNAPSHOT_LIMIT: usize = 16 * 1024;

/// Configuration for the fixed-topology engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Environment name stamped on every run.
    pub environment: String,
    /// Default retry budget per stage.
    pub max_retries: u32,
    /// Deadline for a single stage execution.
    pub stage_timeout: Duration,
    /// Deadline for a whole run.
    pub run_timeout: Duration,
    pub retry: RetryPolicy,
    /// Per-stage configuration, keyed by stage name (e.g. a `check` include
    /// list, a `notify` driver set, a per-stage `max_retries` override).
    pub stage_configs: HashMap<String, serde_json::Value>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            environment: "production".to_owned(),
            max_retries: 3,
            stage_timeout: Duration::from_secs(30),
            run_timeout: Duration::from_secs(300),
            retry: RetryPolicy::default(),
            stage_configs: HashMap::new(),
        }
    }
}

/// One submission to the fixed-topology engine.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub payload: serde_json::Value,
    pub source: Option<String>,
    pub trace_id: Option<String>,
    pub incident_id: Option<Uuid>,
    pub max_retries: Option<u32>,
}

impl SubmitRequest {
    #[must_use]
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            payload,
            source: None,
            trace_id: None,
            incident_id: None,
            max_retries: None,
        }
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    #[must_use]
    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    #[must_use]
    pub fn with_incident(mut self, incident_id: Uuid) -> Self {
        self.incident_id = Some(incident_id);
        self
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// Run status reached after a stage succeeds.
fn status_after(stage: &str) -> Option<RunStatus> {
    match stage {
        "ingest" => Some(RunStatus::Ingested),
        "check" => Some(RunStatus::Checked),
        "analyze" => Some(RunStatus::Analyzed),
        "notify" => Some(RunStatus::Notified),
        _ => None,
    }
}

fn payload_blob_key(run_id: &str) -> String {
    format!("runs/{run_id}/payload")
}

/// The fixed-topology orchestrator.
///
/// Drives a run through ingest, check, analyze, and notify with durable
/// per-stage state:
///
/// ```text
/// PENDING -> INGESTED -> CHECKED -> ANALYZED -> NOTIFIED (terminal)
///     |          |           |          |
///     +----------+-----------+----------+--> FAILED (terminal) <-> RETRYING
/// ```
///
/// Every stage attempt follows the same protocol: insert a pending
/// `StageExecution` row keyed by the idempotency hash (the unique constraint
/// rejects double execution), mark it running, invoke the executor under the
/// stage deadline, and persist the outcome before advancing. Failed runs can
/// be resumed from the first stage without a succeeded row.
pub struct PipelineEngine {
    store: Arc<dyn Store>,
    stages: Vec<Arc<dyn StageExecutor>>,
    config: EngineConfig,
    cancellations: DashMap<String, CancellationToken>,
}

impl PipelineEngine {
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        stages: Vec<Arc<dyn StageExecutor>>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            stages,
            config,
            cancellations: DashMap::new(),
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Create a pending run for a submission without driving it. The payload
    /// is persisted so the ingest stage can be resumed later.
    pub async fn create_run(&self, request: &SubmitRequest) -> Result<PipelineRun, PipelineError> {
        let mut run = PipelineRun::new(request.source.clone(), &self.config.environment);
        if let Some(trace_id) = &request.trace_id {
            run.trace_id.clone_from(trace_id);
        }
        run.max_retries = request.max_retries.unwrap_or(self.config.max_retries);
        run.incident_id = request.incident_id;

        self.store.insert_run(&run).await?;
        self.store
            .put_output_blob(&payload_blob_key(&run.run_id), &request.payload)
            .await?;
        Ok(run)
    }

    /// Submit a payload and drive the run to a terminal state.
    pub async fn submit(&self, request: SubmitRequest) -> Result<PipelineRun, PipelineError> {
        let run = self.create_run(&request).await?;
        self.drive(run, request.payload).await
    }

    /// Drive a freshly created run from the first stage.
    #[instrument(skip(self, run, payload), fields(run_id = %run.run_id, trace_id = %run.trace_id))]
    pub async fn drive(
        &self,
        run: PipelineRun,
        payload: serde_json::Value,
    ) -> Result<PipelineRun, PipelineError> {
        self.drive_from(run, payload, 0, HashMap::new(), HashMap::new())
            .await
    }

    /// Resume a failed or retrying run at the first stage without a
    /// succeeded (or skipped) execution row. Outputs of already-succeeded
    /// stages are re-read, not recomputed; attempt counters continue from
    /// the prior maximum.
    #[instrument(skip(self))]
    pub async fn resume(&self, run_id: &str) -> Result<PipelineRun, PipelineError> {
        let mut run = self
            .store
            .get_run(run_id)
            .await?
            .ok_or_else(|| PipelineError::RunNotFound(run_id.to_owned()))?;
        if !run.status.is_resumable() {
            return Err(PipelineError::NotResumable {
                run_id: run_id.to_owned(),
                status: run.status,
            });
        }

        let executions = self.store.stage_executions_for_run(run_id).await?;
        let mut attempts: HashMap<String, u32> = HashMap::new();
        for execution in &executions {
            let entry = attempts.entry(execution.stage.clone()).or_insert(0);
            *entry = (*entry).max(execution.attempt);
        }

        let mut previous_outputs = HashMap::new();
        let mut start_index = self.stages.len();
        for (index, stage) in self.stages.iter().enumerate() {
            let settled = executions.iter().find(|e| {
                e.stage == stage.name()
                    && matches!(e.status, StageStatus::Succeeded | StageStatus::Skipped)
            });
            match settled {
                Some(execution) if execution.status == StageStatus::Succeeded => {
                    let output = match (&execution.output_snapshot, &execution.output_ref) {
                        (Some(snapshot), _) => snapshot.clone(),
                        (None, Some(reference)) => self
                            .store
                            .get_output_blob(reference)
                            .await?
                            .unwrap_or(serde_json::Value::Null),
                        (None, None) => serde_json::Value::Null,
                    };
                    previous_outputs.insert(stage.name().to_owned(), output);
                }
                Some(_) => {} // skipped stages contribute no output
                None => {
                    start_index = index;
                    break;
                }
            }
        }
        if start_index == self.stages.len() {
            return Err(PipelineError::NotResumable {
                run_id: run_id.to_owned(),
                status: run.status,
            });
        }

        let payload = self
            .store
            .get_output_blob(&payload_blob_key(run_id))
            .await?
            .unwrap_or(serde_json::Value::Null);

        info!(
            run_id,
            stage = self.stages[start_index].name(),
            "resuming run"
        );
        run.status = RunStatus::Retrying;
        self.store.update_run(&run).await?;

        self.drive_from(run, payload, start_index, previous_outputs, attempts)
            .await
    }

    /// Request external cancellation of a run currently being driven by this
    /// engine. Returns whether a live run was signalled.
    pub fn cancel(&self, run_id: &str) -> bool {
        match self.cancellations.get(run_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    async fn drive_from(
        &self,
        mut run: PipelineRun,
        payload: serde_json::Value,
        start_index: usize,
        mut previous_outputs: HashMap<String, serde_json::Value>,
        attempts: HashMap<String, u32>,
    ) -> Result<PipelineRun, PipelineError> {
        let token = self
            .cancellations
            .entry(run.run_id.clone())
            .or_insert_with(CancellationToken::new)
            .clone();

        if run.started_at.is_none() {
            run.started_at = Some(Utc::now());
        }
        let run_deadline = Instant::now() + self.config.run_timeout;

        for index in start_index..self.stages.len() {
            let stage = Arc::clone(&self.stages[index]);
            let stage_name = stage.name();
            let mut attempt = attempts.get(stage_name).copied().unwrap_or(0) + 1;

            loop {
                // Cancellation and run-deadline checks at stage boundaries.
                if token.is_cancelled() {
                    return self.finish_cancelled(run).await;
                }
                if Instant::now() >= run_deadline {
                    return self
                        .finish_failed(run, "timeout", "run deadline exceeded", false)
                        .await;
                }

                let mut execution = StageExecution::pending(&run.run_id, stage_name, attempt);
                match self.store.insert_stage_execution(&execution).await {
                    Ok(()) => {}
                    Err(StoreError::Conflict(_)) => {
                        // The idempotency key exists: this attempt is already
                        // owned elsewhere. Stop driving, no new row.
                        warn!(
                            run_id = %run.run_id,
                            stage = stage_name,
                            attempt,
                            "stage attempt already exists, yielding"
                        );
                        let current = self.store.get_run(&run.run_id).await?.unwrap_or(run);
                        self.cancellations.remove(&current.run_id);
                        return Ok(current);
                    }
                    Err(e) => return Err(e.into()),
                }

                execution.status = StageStatus::Running;
                execution.started_at = Some(Utc::now());
                self.store.update_stage_execution(&execution).await?;

                run.current_stage = Some(stage_name.to_owned());
                self.store.update_run(&run).await?;

                let ctx = StageContext {
                    trace_id: run.trace_id.clone(),
                    run_id: run.run_id.clone(),
                    incident_id: run.incident_id,
                    source: run.source.clone(),
                    environment: run.environment.clone(),
                    payload: payload.clone(),
                    previous_outputs: previous_outputs.clone(),
                    stage_config: self
                        .config
                        .stage_configs
                        .get(stage_name)
                        .cloned()
                        .unwrap_or(serde_json::Value::Null),
                    deadline: self.config.stage_timeout,
                };

                debug!(run_id = %run.run_id, stage = stage_name, attempt, "executing stage");
                let started = Instant::now();
                let outcome = tokio::select! {
                    () = token.cancelled() => None,
                    result = tokio::time::timeout(self.config.stage_timeout, stage.execute(&ctx)) => {
                        Some(match result {
                            Ok(inner) => inner,
                            Err(_) => Err(StageError::timeout(self.config.stage_timeout)),
                        })
                    }
                };
                let duration_ms =
                    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                execution.completed_at = Some(Utc::now());
                execution.duration_ms = Some(duration_ms);

                match outcome {
                    None => {
                        // Cancelled mid-stage: the current row fails with
                        // error_type = cancelled.
                        execution.status = StageStatus::Failed;
                        execution.error_type = Some("cancelled".to_owned());
                        execution.error_message = Some("execution cancelled".to_owned());
                        execution.error_retryable = Some(false);
                        self.store.update_stage_execution(&execution).await?;
                        return self.finish_cancelled(run).await;
                    }
                    Some(Ok(result)) => {
                        if result.skipped {
                            execution.status = StageStatus::Skipped;
                            execution.output_snapshot = Some(serde_json::json!({
                                "skipped": true,
                                "skip_reason": result.skip_reason,
                            }));
                            self.store.update_stage_execution(&execution).await?;
                        } else {
                            let serialized = serde_json::to_vec(&result.output)
                                .map_err(|e| PipelineError::Serialization(e.to_string()))?;
                            if serialized.len() > INLINE_SNAPSHOT_LIMIT {
                                let key = format!(
                                    "runs/{}/{}/{}",
                                    run.run_id, stage_name, attempt
                                );
                                self.store.put_output_blob(&key, &result.output).await?;
                                execution.output_ref = Some(key);
                            } else {
                                execution.output_snapshot = Some(result.output.clone());
                            }
                            if !result.errors.is_empty() {
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
                            }
                            previous_outputs.insert(stage_name.to_owned(), result.output);
                        }

                        // Persist the advancement before moving on.
                        if let Some(next_status) = status_after(stage_name) {
                            run.status = next_status;
                        }
                        self.store.update_run(&run).await?;
                        break;
                    }
                    Some(Err(stage_error)) => {
                        execution.status = StageStatus::Failed;
                        execution.error_type = Some(stage_error.error_type().to_owned());
                        execution.error_message = Some(stage_error.message.clone());
                        execution.error_retryable = Some(stage_error.retryable);
                        self.store.update_stage_execution(&execution).await?;

                        run.total_attempts += 1;
                        run.last_error_type = Some(stage_error.error_type().to_owned());
                        run.last_error_message = Some(stage_error.message.clone());
                        run.last_error_retryable = Some(stage_error.retryable);

                        let budget = self.retry_budget(stage_name, &run);
                        if stage_error.retryable && attempt <= budget {
                            run.status = RunStatus::Retrying;
                            self.store.update_run(&run).await?;

                            let delay = self.config.retry.delay_for(attempt);
                            warn!(
                                run_id = %run.run_id,
                                stage = stage_name,
                                attempt,
                                delay_ms = %delay.as_millis(),
                                error = %stage_error,
                                "retryable stage failure, backing off"
                            );
                            tokio::select! {
                                () = token.cancelled() => {
                                    return self.finish_cancelled(run).await;
                                }
                                () = tokio::time::sleep(delay) => {}
                            }
                            attempt += 1;
                            continue;
                        }

                        warn!(
                            run_id = %run.run_id,
                            stage = stage_name,
                            attempt,
                            error = %stage_error,
                            "stage failed terminally"
                        );
                        return self
                            .finish_failed(
                                run,
                                stage_error.error_type(),
                                &stage_error.message,
                                stage_error.retryable,
                            )
                            .await;
                    }
                }
            }
        }

        run.completed_at = Some(Utc::now());
        run.total_duration_ms = run.started_at.map(|started| {
            u64::try_from((Utc::now() - started).num_milliseconds().max(0)).unwrap_or(0)
        });
        self.store.update_run(&run).await?;
        self.cancellations.remove(&run.run_id);
        info!(run_id = %run.run_id, status = %run.status, "run completed");
        Ok(run)
    }

    /// Retry budget for one stage: the smaller of the stage override and the
    /// run's budget.
    fn retry_budget(&self, stage_name: &str, run: &PipelineRun) -> u32 {
        let stage_override = self
            .config
            .stage_configs
            .get(stage_name)
            .and_then(|cfg| cfg.get("max_retries"))
            .and_then(serde_json::Value::as_u64)
            .and_then(|v| u32::try_from(v).ok());
        stage_override.map_or(run.max_retries, |v| v.min(run.max_retries))
    }

    async fn finish_failed(
        &self,
        mut run: PipelineRun,
        error_type: &str,
        message: &str,
        retryable: bool,
    ) -> Result<PipelineRun, PipelineError> {
        run.status = RunStatus::Failed;
        run.last_error_type = Some(error_type.to_owned());
        run.last_error_message = Some(message.to_owned());
        run.last_error_retryable = Some(retryable);
        run.completed_at = Some(Utc::now());
        run.total_duration_ms = run.started_at.map(|started| {
            u64::try_from((Utc::now() - started).num_milliseconds().max(0)).unwrap_or(0)
        });
        self.store.update_run(&run).await?;
        self.cancellations.remove(&run.run_id);
        Ok(run)
    }

    async fn finish_cancelled(
        &self,
        mut run: PipelineRun,
    ) -> Result<PipelineRun, PipelineError> {
        info!(run_id = %run.run_id, "run cancelled");
        run.status = RunStatus::Cancelled;
        run.last_error_type = Some("cancelled".to_owned());
        run.last_error_message = Some("run cancelled externally".to_owned());
        run.last_error_retryable = Some(false);
        run.completed_at = Some(Utc::now());
        self.store.update_run(&run).await?;
        self.cancellations.remove(&run.run_id);
        Ok(run)
    }
}
