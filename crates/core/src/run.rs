use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::fingerprint::idempotency_key;

/// Default retry budget per stage when neither the submission nor the stage
/// config overrides it.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Lifecycle status of a pipeline run.
///
/// Fixed-topology runs advance `pending -> ingested -> checked -> analyzed ->
/// notified`; definition runs terminate in `completed`. `retrying` is the
/// transient state between a retryable stage failure and the next attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Ingested,
    Checked,
    Analyzed,
    Notified,
    Retrying,
    Failed,
    Completed,
    Cancelled,
}

impl RunStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ingested => "ingested",
            Self::Checked => "checked",
            Self::Analyzed => "analyzed",
            Self::Notified => "notified",
            Self::Retrying => "retrying",
            Self::Failed => "failed",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Terminal statuses are never left again.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Notified | Self::Failed | Self::Completed | Self::Cancelled
        )
    }

    /// Whether the run can be re-entered by the resume operation.
    #[must_use]
    pub fn is_resumable(self) -> bool {
        matches!(self, Self::Failed | Self::Retrying)
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "ingested" => Ok(Self::Ingested),
            "checked" => Ok(Self::Checked),
            "analyzed" => Ok(Self::Analyzed),
            "notified" => Ok(Self::Notified),
            "retrying" => Ok(Self::Retrying),
            "failed" => Ok(Self::Failed),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level record of one orchestration.
///
/// The `trace_id` is propagated to every child record (stage executions,
/// check runs, analysis runs) so one logical flow can be reconstructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub run_id: String,
    pub trace_id: String,
    /// Source driver hint the run was submitted with, if any.
    pub source: Option<String>,
    pub environment: String,
    pub incident_id: Option<Uuid>,
    pub status: RunStatus,
    pub current_stage: Option<String>,
    /// Cumulative failed attempts across all stages of this run.
    pub total_attempts: u32,
    pub max_retries: u32,
    pub last_error_type: Option<String>,
    pub last_error_message: Option<String>,
    pub last_error_retryable: Option<bool>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_duration_ms: Option<u64>,
}

impl PipelineRun {
    /// Create a pending run with fresh run and trace ids.
    #[must_use]
    pub fn new(source: Option<String>, environment: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            trace_id: Uuid::new_v4().to_string(),
            source,
            environment: environment.into(),
            incident_id: None,
            status: RunStatus::Pending,
            current_stage: None,
            total_attempts: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            last_error_type: None,
            last_error_message: None,
            last_error_retryable: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            total_duration_ms: None,
        }
    }

    /// Use a caller-supplied trace id instead of a generated one.
    #[must_use]
    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = trace_id.into();
        self
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn with_incident(mut self, incident_id: Uuid) -> Self {
        self.incident_id = Some(incident_id);
        self
    }
}

/// Status of one stage execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl StageStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl std::str::FromStr for StageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            other => Err(format!("unknown stage status: {other}")),
        }
    }
}

/// One attempt of one stage (or one definition node) within a run.
///
/// The idempotency key is unique in storage; no two rows can exist for the
/// same `(run, stage, attempt)` triple, and no two `succeeded` rows for the
/// same `(run, stage)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageExecution {
    pub id: Uuid,
    pub run_id: String,
    pub stage: String,
    /// 1-based attempt counter, strictly increasing per `(run, stage)`.
    pub attempt: u32,
    pub idempotency_key: String,
    pub status: StageStatus,
    pub input_ref: Option<String>,
    /// Reference to an externally stored output (large outputs).
    pub output_ref: Option<String>,
    /// Inline output (small outputs).
    pub output_snapshot: Option<serde_json::Value>,
    pub error_type: Option<String>,
    pub error_message: Option<String>,
    pub error_stack: Option<String>,
    pub error_retryable: Option<bool>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
}

impl StageExecution {
    /// Create a pending execution row keyed by `(run, stage, attempt)`.
    #[must_use]
    pub fn pending(run_id: impl Into<String>, stage: impl Into<String>, attempt: u32) -> Self {
        let run_id = run_id.into();
        let stage = stage.into();
        let key = idempotency_key(&run_id, &stage, attempt);
        Self {
            id: Uuid::new_v4(),
            run_id,
            stage,
            attempt,
            idempotency_key: key,
            status: StageStatus::Pending,
            input_ref: None,
            output_ref: None,
            output_snapshot: None,
            error_type: None,
            error_message: None,
            error_stack: None,
            error_retryable: None,
            started_at: None,
            completed_at: None,
            duration_ms: None,
        }
    }

    /// Create a pending row whose idempotency key is derived from a separate
    /// key component (definition nodes hash the node id, while `stage` still
    /// records the node type).
    #[must_use]
    pub fn pending_keyed(
        run_id: impl Into<String>,
        stage: impl Into<String>,
        key_component: &str,
        attempt: u32,
    ) -> Self {
        let run_id = run_id.into();
        let key = idempotency_key(&run_id, key_component, attempt);
        Self {
            idempotency_key: key,
            ..Self::pending(run_id, stage, attempt)
        }
    }
}
