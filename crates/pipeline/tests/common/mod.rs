#![allow(dead_code)]

use std::sync::Arc;

use klaxon_check::CheckerRegistry;
use klaxon_check::mock::StaticChecker;
use klaxon_core::NotificationChannel;
use klaxon_ingest::Normalizer;
use klaxon_intel::ProviderRegistry;
use klaxon_notify::DriverRegistry;
use klaxon_pipeline::{
    AnalyzeStage, CheckStage, DefinitionEngine, EngineConfig, IngestStage, NotifyStage,
    PipelineEngine, RetryPolicy, nodes,
};
use klaxon_store::Store;
use klaxon_store_memory::{MemoryFingerprintLock, MemoryStore};

/// Shared wiring for orchestration tests: in-memory storage, the default
/// source drivers, two static checkers, the local intelligence fallback,
/// and a caller-supplied notify driver set.
pub struct TestHarness {
    pub store: Arc<dyn Store>,
    pub normalizer: Arc<Normalizer>,
    pub checkers: Arc<CheckerRegistry>,
    pub providers: Arc<ProviderRegistry>,
    pub drivers: Arc<DriverRegistry>,
}

impl TestHarness {
    pub fn new(drivers: DriverRegistry) -> Self {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let normalizer = Arc::new(Normalizer::new(
            Arc::clone(&store),
            Arc::new(MemoryFingerprintLock::new()),
            Arc::new(klaxon_ingest::default_registry()),
        ));

        let mut checkers = CheckerRegistry::new();
        checkers.register(Arc::new(StaticChecker::ok("cpu")));
        checkers.register(Arc::new(StaticChecker::warning("memory", "swap in use")));

        Self {
            store,
            normalizer,
            checkers: Arc::new(checkers),
            providers: Arc::new(ProviderRegistry::new()),
            drivers: Arc::new(drivers),
        }
    }

    /// Build the fixed-topology engine over this harness's collaborators.
    pub fn engine(&self, config: EngineConfig) -> PipelineEngine {
        let stages: Vec<Arc<dyn klaxon_pipeline::StageExecutor>> = vec![
            Arc::new(IngestStage::new(Arc::clone(&self.normalizer))),
            Arc::new(CheckStage::new(
                Arc::clone(&self.checkers),
                Arc::clone(&self.store),
                "test-host",
            )),
            Arc::new(AnalyzeStage::new(
                Arc::clone(&self.providers),
                Arc::clone(&self.store),
            )),
            Arc::new(NotifyStage::new(
                Arc::clone(&self.drivers),
                Arc::clone(&self.store),
            )),
        ];
        PipelineEngine::new(Arc::clone(&self.store), stages, config)
    }

    /// Build the definition engine with the standard node registry.
    pub fn definition_engine(&self) -> DefinitionEngine {
        let registry = nodes::standard_registry(
            Arc::clone(&self.normalizer),
            Arc::clone(&self.checkers),
            Arc::clone(&self.providers),
            Arc::clone(&self.drivers),
            Arc::clone(&self.store),
            "test-host",
        );
        DefinitionEngine::new(Arc::clone(&self.store), Arc::new(registry))
            .with_retry(RetryPolicy::fast())
            .with_environment("test")
    }

    pub async fn seed_channel(&self, name: &str, driver: &str) {
        self.store
            .insert_channel(&NotificationChannel::new(
                name,
                driver,
                serde_json::json!({}),
            ))
            .await
            .expect("channel insert should succeed");
    }
}

/// Engine config with millisecond backoff for fast tests.
pub fn fast_config() -> EngineConfig {
    EngineConfig {
        environment: "test".to_owned(),
        retry: RetryPolicy::fast(),
        ..EngineConfig::default()
    }
}

/// The literal scenario payload: a single firing Alertmanager alert.
pub fn alertmanager_firing() -> serde_json::Value {
    serde_json::json!({
        "alerts": [{
            "status": "firing",
            "labels": {"alertname": "HighCPU", "severity": "critical", "instance": "web-01"},
            "annotations": {"description": "CPU>90%"},
            "startsAt": "2026-01-01T00:00:00Z"
        }]
    })
}

pub fn alertmanager_resolved() -> serde_json::Value {
    serde_json::json!({
        "alerts": [{
            "status": "resolved",
            "labels": {"alertname": "HighCPU", "severity": "critical", "instance": "web-01"}
        }]
    })
}
