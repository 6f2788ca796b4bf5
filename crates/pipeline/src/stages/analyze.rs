use std::sync::Arc;

use async_trait::async_trait;
use tracing::instrument;

use klaxon_core::{AnalysisStatus, StageError, StageFault};
use klaxon_intel::{
    ActiveProviderCache, AnalysisRequest, ProviderRegistry, analyze_with_fallback,
};
use klaxon_store::Store;

use crate::context::StageContext;
use crate::stage::{StageExecutor, StageResult};

use super::classify_store;

/// How long a cached active-provider snapshot stays valid.
const PROVIDER_CACHE_TTL: std::time::Duration = std::time::Duration::from_secs(30);

/// Third stage: ask the active intelligence provider for recommendations.
///
/// A provider failure silently substitutes the local rule engine and records
/// an `AnalysisRun` with `status = fallback`; the stage only fails when the
/// local fallback itself fails. The active provider row is read through a
/// snapshot cache so config changes publish atomically to readers.
pub struct AnalyzeStage {
    providers: Arc<ProviderRegistry>,
    store: Arc<dyn Store>,
    cache: ActiveProviderCache,
}

impl AnalyzeStage {
    #[must_use]
    pub fn new(providers: Arc<ProviderRegistry>, store: Arc<dyn Store>) -> Self {
        let cache = ActiveProviderCache::new(Arc::clone(&store), PROVIDER_CACHE_TTL);
        Self {
            providers,
            store,
            cache,
        }
    }
}

#[async_trait]
impl StageExecutor for AnalyzeStage {
    fn name(&self) -> &'static str {
        "analyze"
    }

    #[instrument(skip(self, ctx), fields(trace_id = %ctx.trace_id, run_id = %ctx.run_id))]
    async fn execute(&self, ctx: &StageContext) -> Result<StageResult, StageError> {
        let incident = match ctx.incident_id {
            Some(id) => self
                .store
                .get_incident(id)
                .await
                .map_err(|e| classify_store(&e))?,
            None => None,
        };
        let checks = self
            .store
            .check_runs_for_trace(&ctx.trace_id)
            .await
            .map_err(|e| classify_store(&e))?;

        let request = AnalysisRequest {
            incident,
            checks,
            config: serde_json::Value::Null,
        };

        let run = analyze_with_fallback(
            &self.providers,
            &self.cache,
            &self.store,
            &ctx.trace_id,
            &ctx.run_id,
            ctx.incident_id,
            request,
            ctx.deadline,
            None,
        )
        .await
        .map_err(|e| {
            if e.is_retryable() {
                StageError::transient(e.to_string())
            } else {
                StageError::catastrophic(e.to_string())
            }
        })?;

        let mut errors = Vec::new();
        if run.status == AnalysisStatus::Fallback {
            errors.push(StageFault::partial(format!(
                "provider {} failed ({}); local rule engine substituted",
                run.provider,
                run.error.as_deref().unwrap_or("unknown error")
            )));
        }

        let output = serde_json::json!({
            "analysis_run_id": run.id,
            "provider": run.provider,
            "status": run.status,
            "recommendations": run.recommendations,
            "total_tokens": run.total_tokens,
        });
        Ok(StageResult::success(output).with_errors(errors))
    }
}
