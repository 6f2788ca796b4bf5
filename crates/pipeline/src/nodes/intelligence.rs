use std::sync::Arc;

use async_trait::async_trait;

use klaxon_core::{AnalysisStatus, NodeKind, StageError, StageFault};
use klaxon_intel::{
    ActiveProviderCache, AnalysisRequest, ProviderRegistry, analyze_with_fallback,
};
use klaxon_store::Store;

use crate::node::{NodeContext, NodeHandler, NodeResult};
use crate::stages::classify_store;

use super::expect_string;

/// How long a cached active-provider snapshot stays valid.
const PROVIDER_CACHE_TTL: std::time::Duration = std::time::Duration::from_secs(30);

/// Node that runs an intelligence provider over the incident and collected
/// diagnostics.
///
/// Provider resolution: the node's `provider` config, else the cached active
/// provider, else the local rule engine. Provider failures fall back to the
/// local engine and are recorded, not fatal.
pub struct IntelligenceNode {
    providers: Arc<ProviderRegistry>,
    store: Arc<dyn Store>,
    cache: ActiveProviderCache,
}

impl IntelligenceNode {
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
impl NodeHandler for IntelligenceNode {
    fn kind(&self) -> NodeKind {
        NodeKind::Intelligence
    }

    fn validate(&self, config: &serde_json::Value) -> Vec<String> {
        let mut errors = Vec::new();
        expect_string(config, "provider", &mut errors);
        errors
    }

    async fn execute(
        &self,
        ctx: &NodeContext,
        config: &serde_json::Value,
    ) -> Result<NodeResult, StageError> {
        let requested = config.get("provider").and_then(serde_json::Value::as_str);

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
            requested,
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
                "provider {} failed; local rule engine substituted",
                run.provider
            )));
        }

        let output = serde_json::json!({
            "analysis_run_id": run.id,
            "provider": run.provider,
            "status": run.status,
            "recommendations": run.recommendations,
            "total_tokens": run.total_tokens,
        });
        Ok(NodeResult::success(output).with_errors(errors))
    }
}

#[cfg(test)]
mod tests {
    use klaxon_intel::mock::MockProvider;
    use klaxon_store_memory::MemoryStore;

    use super::*;

    fn ctx() -> NodeContext {
        NodeContext {
            trace_id: "trace-1".into(),
            run_id: "run-1".into(),
            incident_id: None,
            source: None,
            environment: "test".into(),
            payload: serde_json::Value::Null,
            previous_outputs: std::collections::HashMap::new(),
            deadline: std::time::Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn config_provider_takes_precedence() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(MockProvider::new("gemini")));

        let node = IntelligenceNode::new(Arc::new(registry), Arc::new(MemoryStore::new()));
        let result = node
            .execute(&ctx(), &serde_json::json!({"provider": "gemini"}))
            .await
            .unwrap();
        assert_eq!(result.output["provider"], "gemini");
        assert_eq!(result.output["total_tokens"], 42);
    }

    #[tokio::test]
    async fn defaults_to_local() {
        let node = IntelligenceNode::new(
            Arc::new(ProviderRegistry::new()),
            Arc::new(MemoryStore::new()),
        );
        let result = node.execute(&ctx(), &serde_json::Value::Null).await.unwrap();
        assert_eq!(result.output["provider"], "local");
        assert!(!result.has_errors());
    }
}
