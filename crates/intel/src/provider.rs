use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use klaxon_core::{Analysis, CheckRun, Incident};

use crate::error::IntelError;
use crate::local::LocalRuleProvider;

/// Everything a provider may consider for one analysis call.
#[derive(Debug, Clone, Default)]
pub struct AnalysisRequest {
    pub incident: Option<Incident>,
    pub checks: Vec<CheckRun>,
    /// Provider-specific configuration from the active [`ProviderConfig`]
    /// (klaxon_core::ProviderConfig) record, or `Null` for the fallback.
    pub config: serde_json::Value,
}

/// An analysis engine producing recommendations for an incident.
///
/// Concrete AI-backed providers (OpenAI, Claude, Gemini, ...) register here;
/// the orchestration core only ever talks to this trait. The local rule
/// engine implements it infallibly and serves as the universal fallback.
#[async_trait]
pub trait IntelProvider: Send + Sync {
    /// Unique provider type name (matches `ProviderConfig.provider_type`).
    fn name(&self) -> &str;

    async fn analyze(&self, request: &AnalysisRequest) -> Result<Analysis, IntelError>;
}

/// Process-wide provider registry, built at startup and immutable once
/// shared. Always contains the local rule engine under `"local"`.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn IntelProvider>>,
    local: Arc<dyn IntelProvider>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        let local: Arc<dyn IntelProvider> = Arc::new(LocalRuleProvider::new());
        let mut providers: HashMap<String, Arc<dyn IntelProvider>> = HashMap::new();
        providers.insert(local.name().to_owned(), Arc::clone(&local));
        Self { providers, local }
    }
}

impl ProviderRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under its own name.
    pub fn register(&mut self, provider: Arc<dyn IntelProvider>) {
        self.providers.insert(provider.name().to_owned(), provider);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn IntelProvider>> {
        self.providers.get(name).cloned()
    }

    /// The always-available local rule engine.
    #[must_use]
    pub fn local(&self) -> Arc<dyn IntelProvider> {
        Arc::clone(&self.local)
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .finish()
    }
}
