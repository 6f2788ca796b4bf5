mod context;
mod ingest;
mod intelligence;
mod notify;
mod transform;

pub use context::ContextNode;
pub use ingest::IngestNode;
pub use intelligence::IntelligenceNode;
pub use notify::NotifyNode;
pub use transform::TransformNode;

use std::sync::Arc;

use klaxon_check::CheckerRegistry;
use klaxon_ingest::Normalizer;
use klaxon_intel::ProviderRegistry;
use klaxon_notify::DriverRegistry;
use klaxon_store::Store;

use crate::node::NodeRegistry;

/// Build a registry with every built-in node type wired against the shared
/// collaborators.
#[must_use]
pub fn standard_registry(
    normalizer: Arc<Normalizer>,
    checkers: Arc<CheckerRegistry>,
    providers: Arc<ProviderRegistry>,
    drivers: Arc<DriverRegistry>,
    store: Arc<dyn Store>,
    hostname: impl Into<String>,
) -> NodeRegistry {
    let hostname = hostname.into();
    let mut registry = NodeRegistry::new();
    registry.register(Arc::new(IngestNode::new(normalizer)));
    registry.register(Arc::new(ContextNode::new(
        checkers,
        Arc::clone(&store),
        hostname,
    )));
    registry.register(Arc::new(IntelligenceNode::new(
        providers,
        Arc::clone(&store),
    )));
    registry.register(Arc::new(NotifyNode::new(drivers, store)));
    registry.register(Arc::new(TransformNode));
    registry
}

/// Shared config-shape checks used by node validators.
pub(crate) fn expect_string_array(
    config: &serde_json::Value,
    key: &str,
    errors: &mut Vec<String>,
) {
    if let Some(value) = config.get(key)
        && !value
            .as_array()
            .is_some_and(|items| items.iter().all(serde_json::Value::is_string))
    {
        errors.push(format!("`{key}` must be an array of strings"));
    }
}

pub(crate) fn expect_string(config: &serde_json::Value, key: &str, errors: &mut Vec<String>) {
    if let Some(value) = config.get(key)
        && !value.is_string()
    {
        errors.push(format!("`{key}` must be a string"));
    }
}
