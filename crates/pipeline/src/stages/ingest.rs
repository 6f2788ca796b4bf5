use std::sync::Arc;

use async_trait::async_trait;
use tracing::instrument;

use klaxon_core::StageError;
use klaxon_ingest::{IngestError, Normalizer};

use crate::context::StageContext;
use crate::stage::{StageExecutor, StageResult};

/// First stage: normalize the submitted payload into alerts and incidents.
///
/// Skipped when the caller already attached an incident to the run (e.g. a
/// scheduled re-analysis of a known incident).
pub struct IngestStage {
    normalizer: Arc<Normalizer>,
}

impl IngestStage {
    #[must_use]
    pub fn new(normalizer: Arc<Normalizer>) -> Self {
        Self { normalizer }
    }
}

pub(crate) fn classify_ingest(error: &IngestError) -> StageError {
    match error {
        IngestError::MalformedPayload(_) | IngestError::UnknownSource(_) => {
            StageError::validation(error.to_string())
        }
        IngestError::Storage(inner) => {
            if inner.is_retryable() {
                StageError::transient(error.to_string())
            } else {
                StageError::catastrophic(error.to_string())
            }
        }
        IngestError::BatchFailed { retryable, .. } => {
            if *retryable {
                StageError::transient(error.to_string())
            } else {
                StageError::validation(error.to_string())
            }
        }
    }
}

#[async_trait]
impl StageExecutor for IngestStage {
    fn name(&self) -> &'static str {
        "ingest"
    }

    #[instrument(skip(self, ctx), fields(trace_id = %ctx.trace_id, run_id = %ctx.run_id))]
    async fn execute(&self, ctx: &StageContext) -> Result<StageResult, StageError> {
        if ctx.incident_id.is_some() {
            return Ok(StageResult::skip("incident already attached to run"));
        }

        let result = self
            .normalizer
            .ingest(ctx.payload.clone(), ctx.source.as_deref())
            .await
            .map_err(|e| classify_ingest(&e))?;

        let errors = result.errors.clone();
        let output = serde_json::to_value(&result)
            .map_err(|e| StageError::catastrophic(format!("ingest result: {e}")))?;
        Ok(StageResult::success(output).with_errors(errors))
    }
}
