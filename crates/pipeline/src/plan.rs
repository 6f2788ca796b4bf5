use std::collections::HashSet;
use std::time::Duration;

use klaxon_core::{DefinitionConfig, NodeDefaults, NodeSpec};

use crate::node::NodeRegistry;

/// A compiled skip predicate. The grammar is intentionally minimal:
/// `<node_id>.has_errors` is the only form; arbitrary expressions are
/// rejected at admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipCondition {
    HasErrors(String),
}

impl SkipCondition {
    pub(crate) fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        match raw.strip_suffix(".has_errors") {
            Some(node_id) if !node_id.is_empty() && !node_id.contains('.') => {
                Ok(Self::HasErrors(node_id.to_owned()))
            }
            _ => Err(format!(
                "unsupported skip_if_condition '{raw}' (expected '<node_id>.has_errors')"
            )),
        }
    }
}

/// One node with defaults merged and skip predicate parsed.
#[derive(Debug, Clone)]
pub struct PlannedNode {
    pub spec: NodeSpec,
    pub skip_condition: Option<SkipCondition>,
    pub max_retries: u32,
    pub timeout: Duration,
}

/// A definition compiled for execution: validated once at admission and
/// immutable for the life of a run. Never re-parsed per execution.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub version: String,
    pub defaults: NodeDefaults,
    pub nodes: Vec<PlannedNode>,
}

/// Validate a definition config against a node registry. Empty result means
/// valid.
#[must_use]
pub fn validate(config: &DefinitionConfig, registry: &NodeRegistry) -> Vec<String> {
    match compile(config, registry) {
        Ok(_) => Vec::new(),
        Err(errors) => errors,
    }
}

/// Validate and compile a definition config.
pub fn compile(
    config: &DefinitionConfig,
    registry: &NodeRegistry,
) -> Result<ExecutionPlan, Vec<String>> {
    let mut errors = Vec::new();

    if config.version.trim().is_empty() {
        errors.push("definition version is required".to_owned());
    }
    if config.nodes.is_empty() {
        errors.push("definition has no nodes".to_owned());
    }

    let ids: Vec<&str> = config.nodes.iter().map(|n| n.id.as_str()).collect();
    let mut seen = HashSet::new();
    for id in &ids {
        if !seen.insert(*id) {
            errors.push(format!("duplicate node id '{id}'"));
        }
    }

    let mut nodes = Vec::with_capacity(config.nodes.len());
    for spec in &config.nodes {
        match registry.get(spec.kind) {
            None => errors.push(format!(
                "node '{}': unknown type '{}'",
                spec.id, spec.kind
            )),
            Some(handler) => {
                for problem in handler.validate(&spec.config) {
                    errors.push(format!("node '{}': {problem}", spec.id));
                }
            }
        }

        if let Some(next) = &spec.next
            && !ids.contains(&next.as_str())
        {
            errors.push(format!(
                "node '{}': next references unknown node '{next}'",
                spec.id
            ));
        }

        let skip_condition = match &spec.skip_if_condition {
            Some(raw) => match SkipCondition::parse(raw) {
                Ok(condition) => Some(condition),
                Err(problem) => {
                    errors.push(format!("node '{}': {problem}", spec.id));
                    None
                }
            },
            None => None,
        };

        // Per-node overrides ride in the node config; the merged defaults
        // apply otherwise.
        let max_retries = spec
            .config
            .get("max_retries")
            .and_then(serde_json::Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(config.defaults.max_retries);
        let timeout_seconds = spec
            .config
            .get("timeout_seconds")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(config.defaults.timeout_seconds);

        nodes.push(PlannedNode {
            spec: spec.clone(),
            skip_condition,
            max_retries,
            timeout: Duration::from_secs(timeout_seconds),
        });
    }

    if errors.is_empty() {
        Ok(ExecutionPlan {
            version: config.version.clone(),
            defaults: config.defaults,
            nodes,
        })
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use klaxon_check::CheckerRegistry;
    use klaxon_notify::DriverRegistry;
    use klaxon_store_memory::MemoryStore;

    use crate::nodes::{ContextNode, NotifyNode, TransformNode};

    use super::*;

    fn registry() -> NodeRegistry {
        let store = Arc::new(MemoryStore::new());
        let mut registry = NodeRegistry::new();
        registry.register(Arc::new(ContextNode::new(
            Arc::new(CheckerRegistry::new()),
            Arc::clone(&store) as Arc<dyn klaxon_store::Store>,
            "host",
        )));
        registry.register(Arc::new(NotifyNode::new(
            Arc::new(DriverRegistry::new()),
            store as Arc<dyn klaxon_store::Store>,
        )));
        registry.register(Arc::new(TransformNode));
        registry
    }

    fn config(value: serde_json::Value) -> DefinitionConfig {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn valid_definition_compiles() {
        let config = config(serde_json::json!({
            "version": "1.0",
            "defaults": {"max_retries": 2, "timeout_seconds": 60},
            "nodes": [
                {"id": "ctx", "type": "context", "config": {"include": ["cpu"]}, "next": "n"},
                {"id": "n", "type": "notify", "config": {"drivers": ["generic"]}}
            ]
        }));
        let errors = validate(&config, &registry());
        assert!(errors.is_empty(), "unexpected: {errors:?}");

        let plan = compile(&config, &registry()).unwrap();
        assert_eq!(plan.nodes.len(), 2);
        assert_eq!(plan.nodes[0].max_retries, 2);
        assert_eq!(plan.nodes[0].timeout, Duration::from_secs(60));
    }

    #[test]
    fn missing_version_and_nodes() {
        let errors = validate(&config(serde_json::json!({"version": "", "nodes": []})), &registry());
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn duplicate_ids_rejected() {
        let errors = validate(
            &config(serde_json::json!({
                "version": "1.0",
                "nodes": [
                    {"id": "a", "type": "context"},
                    {"id": "a", "type": "notify"}
                ]
            })),
            &registry(),
        );
        assert!(errors.iter().any(|e| e.contains("duplicate node id 'a'")));
    }

    #[test]
    fn unregistered_type_rejected() {
        // intelligence is a valid kind but not registered in this registry.
        let errors = validate(
            &config(serde_json::json!({
                "version": "1.0",
                "nodes": [{"id": "brain", "type": "intelligence"}]
            })),
            &registry(),
        );
        assert!(errors.iter().any(|e| e.contains("unknown type 'intelligence'")));
    }

    #[test]
    fn unresolved_next_rejected() {
        let errors = validate(
            &config(serde_json::json!({
                "version": "1.0",
                "nodes": [{"id": "a", "type": "context", "next": "ghost"}]
            })),
            &registry(),
        );
        assert!(errors.iter().any(|e| e.contains("unknown node 'ghost'")));
    }

    #[test]
    fn node_config_errors_surface() {
        let errors = validate(
            &config(serde_json::json!({
                "version": "1.0",
                "nodes": [{"id": "t", "type": "transform", "config": {}}]
            })),
            &registry(),
        );
        assert!(errors.iter().any(|e| e.contains("source_node")));
    }

    #[test]
    fn skip_condition_grammar() {
        assert_eq!(
            SkipCondition::parse("ctx.has_errors").unwrap(),
            SkipCondition::HasErrors("ctx".into())
        );
        assert!(SkipCondition::parse(".has_errors").is_err());
        assert!(SkipCondition::parse("ctx.errors > 0").is_err());
        assert!(SkipCondition::parse("a.b.has_errors").is_err());

        let errors = validate(
            &config(serde_json::json!({
                "version": "1.0",
                "nodes": [{
                    "id": "a", "type": "context",
                    "skip_if_condition": "len(errors) > 0"
                }]
            })),
            &registry(),
        );
        assert!(errors.iter().any(|e| e.contains("skip_if_condition")));
    }

    #[test]
    fn per_node_overrides() {
        let plan = compile(
            &config(serde_json::json!({
                "version": "1.0",
                "nodes": [{
                    "id": "a", "type": "context",
                    "config": {"max_retries": 1, "timeout_seconds": 5}
                }]
            })),
            &registry(),
        )
        .unwrap();
        assert_eq!(plan.nodes[0].max_retries, 1);
        assert_eq!(plan.nodes[0].timeout, Duration::from_secs(5));
    }
}
