use std::sync::Arc;

use klaxon_core::NormalizedAlert;

use crate::error::IngestError;

/// A webhook interpreter for one monitoring source.
///
/// Drivers are pure: they inspect and translate payloads without touching
/// storage. Probe order across drivers is deterministic -- ascending
/// [`priority`](SourceDriver::priority), then registration order -- so an
/// ambiguous payload always resolves to the same driver.
pub trait SourceDriver: Send + Sync {
    /// Unique source name (used as `Alert.source` and as the `source_hint`).
    fn name(&self) -> &str;

    /// Probe ordering: lower values are tried first. The generic driver
    /// uses the maximum priority so it is always last.
    fn priority(&self) -> i32;

    /// Whether this driver recognizes the payload shape.
    fn probe(&self, payload: &serde_json::Value) -> bool;

    /// Translate the payload into normalized alerts.
    fn normalize(&self, payload: &serde_json::Value)
    -> Result<Vec<NormalizedAlert>, IngestError>;
}

/// Ordered registry of source drivers.
///
/// Built at startup -- register every driver, then share behind `Arc`; the
/// registry is immutable afterwards.
#[derive(Default)]
pub struct SourceRegistry {
    drivers: Vec<Arc<dyn SourceDriver>>,
}

impl SourceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a driver, keeping the probe order sorted by priority.
    /// Registration order breaks priority ties.
    pub fn register(&mut self, driver: Arc<dyn SourceDriver>) {
        self.drivers.push(driver);
        self.drivers.sort_by_key(|d| d.priority());
    }

    /// Look up a driver by source name (used for `source_hint`).
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn SourceDriver>> {
        self.drivers.iter().find(|d| d.name() == name).cloned()
    }

    /// Detect the driver for an unhinted payload: first probe match in
    /// priority order.
    #[must_use]
    pub fn detect(&self, payload: &serde_json::Value) -> Option<Arc<dyn SourceDriver>> {
        self.drivers.iter().find(|d| d.probe(payload)).cloned()
    }

    /// Registered source names in probe order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.drivers.iter().map(|d| d.name().to_owned()).collect()
    }
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("drivers", &self.names())
            .finish()
    }
}

/// Build a registry with every built-in driver registered.
#[must_use]
pub fn default_registry() -> SourceRegistry {
    let mut registry = SourceRegistry::new();
    registry.register(Arc::new(crate::drivers::AlertmanagerDriver));
    registry.register(Arc::new(crate::drivers::GrafanaDriver));
    registry.register(Arc::new(crate::drivers::PagerDutyDriver));
    registry.register(Arc::new(crate::drivers::NewRelicDriver));
    registry.register(Arc::new(crate::drivers::DatadogDriver));
    registry.register(Arc::new(crate::drivers::ZabbixDriver));
    registry.register(Arc::new(crate::drivers::OpsGenieDriver));
    registry.register(Arc::new(crate::drivers::GenericDriver));
    registry
}
