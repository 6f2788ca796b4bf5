use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::severity::CheckStatus;

/// The value a checker probe returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub status: CheckStatus,
    pub message: String,
    /// Free-form numeric or string metrics collected by the probe.
    #[serde(default)]
    pub metrics: BTreeMap<String, serde_json::Value>,
}

impl CheckResult {
    #[must_use]
    pub fn new(status: CheckStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            metrics: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn ok(message: impl Into<String>) -> Self {
        Self::new(CheckStatus::Ok, message)
    }

    #[must_use]
    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(CheckStatus::Warning, message)
    }

    #[must_use]
    pub fn critical(message: impl Into<String>) -> Self {
        Self::new(CheckStatus::Critical, message)
    }

    #[must_use]
    pub fn with_metric(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metrics.insert(key.into(), value);
        self
    }
}

/// Persisted record of one execution of one checker. Never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckRun {
    pub id: Uuid,
    pub checker_name: String,
    pub hostname: String,
    pub status: CheckStatus,
    pub message: String,
    #[serde(default)]
    pub metrics: BTreeMap<String, serde_json::Value>,
    /// Error detail when the probe itself failed (status `unknown`).
    pub error: Option<String>,
    /// Correlation id of the pipeline flow that triggered the check.
    pub trace_id: String,
    pub executed_at: DateTime<Utc>,
}

impl CheckRun {
    /// Record a successful probe execution.
    #[must_use]
    pub fn from_result(
        checker_name: impl Into<String>,
        hostname: impl Into<String>,
        trace_id: impl Into<String>,
        result: &CheckResult,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            checker_name: checker_name.into(),
            hostname: hostname.into(),
            status: result.status,
            message: result.message.clone(),
            metrics: result.metrics.clone(),
            error: None,
            trace_id: trace_id.into(),
            executed_at: Utc::now(),
        }
    }

    /// Record a probe that failed to run at all.
    #[must_use]
    pub fn from_error(
        checker_name: impl Into<String>,
        hostname: impl Into<String>,
        trace_id: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        let error = error.into();
        Self {
            id: Uuid::new_v4(),
            checker_name: checker_name.into(),
            hostname: hostname.into(),
            status: CheckStatus::Unknown,
            message: format!("checker failed: {error}"),
            metrics: BTreeMap::new(),
            error: Some(error),
            trace_id: trace_id.into(),
            executed_at: Utc::now(),
        }
    }
}
