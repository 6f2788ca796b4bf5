use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};
use uuid::Uuid;

use klaxon_core::{AnalysisRun, AnalysisStatus};
use klaxon_store::Store;

use crate::cache::ActiveProviderCache;
use crate::error::IntelError;
use crate::provider::{AnalysisRequest, IntelProvider, ProviderRegistry};

/// Run one analysis with the active provider, substituting the local rule
/// engine on failure, and persist the resulting [`AnalysisRun`].
///
/// Resolution order: the explicitly requested provider name, then the
/// active provider from the snapshot cache, then the local fallback. A
/// provider failure records `status = fallback` with the configured
/// provider's name and the original error; only a local-fallback failure
/// returns `Err` (and records `status = failed`).
pub async fn analyze_with_fallback(
    registry: &ProviderRegistry,
    cache: &ActiveProviderCache,
    store: &Arc<dyn Store>,
    trace_id: &str,
    run_id: &str,
    incident_id: Option<Uuid>,
    mut request: AnalysisRequest,
    deadline: Duration,
    requested_provider: Option<&str>,
) -> Result<AnalysisRun, IntelError> {
    let configured = match requested_provider {
        Some(name) => Some((name.to_owned(), serde_json::Value::Null)),
        None => cache
            .current()
            .await
            .map_err(|e| IntelError::Unavailable(e.to_string()))?
            .map(|p| (p.provider_type, p.config)),
    };

    let (provider, provider_name, provider_config) = match configured {
        Some((name, config)) => match registry.get(&name) {
            Some(provider) => (provider, name, config),
            None => {
                warn!(provider = %name, "configured provider not registered, using local");
                let local = registry.local();
                let local_name = local.name().to_owned();
                (local, local_name, serde_json::Value::Null)
            }
        },
        None => {
            let local = registry.local();
            let local_name = local.name().to_owned();
            (local, local_name, serde_json::Value::Null)
        }
    };
    request.config = provider_config.clone();

    debug!(trace_id, provider = %provider_name, "running analysis");
    let outcome = match tokio::time::timeout(deadline, provider.analyze(&request)).await {
        Ok(Ok(analysis)) => Ok(analysis),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(IntelError::Timeout(deadline)),
    };

    let run = match outcome {
        Ok(analysis) => AnalysisRun::new(
            trace_id,
            run_id,
            incident_id,
            &provider_name,
            AnalysisStatus::Succeeded,
        )
        .with_provider_config(provider_config)
        .with_analysis(analysis),
        Err(original) => {
            warn!(
                trace_id,
                provider = %provider_name,
                error = %original,
                "provider failed, falling back to local rule engine"
            );
            request.config = serde_json::Value::Null;
            match registry.local().analyze(&request).await {
                Ok(analysis) => AnalysisRun::new(
                    trace_id,
                    run_id,
                    incident_id,
                    &provider_name,
                    AnalysisStatus::Fallback,
                )
                .with_provider_config(provider_config)
                .with_analysis(analysis)
                .with_error(original.to_string()),
                Err(fallback_error) => {
                    let failed = AnalysisRun::new(
                        trace_id,
                        run_id,
                        incident_id,
                        &provider_name,
                        AnalysisStatus::Failed,
                    )
                    .with_error(format!(
                        "provider: {original}; local fallback: {fallback_error}"
                    ));
                    let _ = store.insert_analysis_run(&failed).await;
                    return Err(fallback_error);
                }
            }
        }
    };

    store
        .insert_analysis_run(&run)
        .await
        .map_err(|e| IntelError::Unavailable(e.to_string()))?;
    Ok(run)
}
