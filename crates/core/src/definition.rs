use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The node types a pipeline definition may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Ingest,
    Context,
    Intelligence,
    Notify,
    Transform,
}

impl NodeKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ingest => "ingest",
            Self::Context => "context",
            Self::Intelligence => "intelligence",
            Self::Notify => "notify",
            Self::Transform => "transform",
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Defaults merged into every node of a definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDefaults {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_timeout_seconds() -> u64 {
    300
}

impl Default for NodeDefaults {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

/// One node in a definition's `nodes` array.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Unique id within the definition.
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    /// Type-specific configuration, validated by the node handler.
    #[serde(default)]
    pub config: serde_json::Value,
    /// Informational pointer to the next node. Linear declared order is the
    /// authoritative execution order; `next` is validated to exist and
    /// otherwise ignored.
    #[serde(default)]
    pub next: Option<String>,
    /// When `true` (the default), a node failure fails the whole run.
    #[serde(default = "default_true")]
    pub required: bool,
    /// Skip this node iff any listed node's result carries errors.
    #[serde(default)]
    pub skip_if_errors: Vec<String>,
    /// Minimal predicate over prior outputs (`<node_id>.has_errors`).
    #[serde(default)]
    pub skip_if_condition: Option<String>,
}

fn default_true() -> bool {
    true
}

impl NodeSpec {
    #[must_use]
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            config: serde_json::Value::Null,
            next: None,
            required: true,
            skip_if_errors: Vec::new(),
            skip_if_condition: None,
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

/// The JSON-describable body of a pipeline definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefinitionConfig {
    /// Schema version string (e.g. `"1.0"`). Required.
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub defaults: NodeDefaults,
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
}

/// A named, versioned pipeline definition as persisted.
///
/// `version` increments on any config change; inactive definitions cannot be
/// executed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDefinition {
    pub name: String,
    pub version: i64,
    pub config: DefinitionConfig,
    #[serde(default)]
    pub tags: Vec<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PipelineDefinition {
    #[must_use]
    pub fn new(name: impl Into<String>, config: DefinitionConfig) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            version: 1,
            config,
            tags: Vec::new(),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_kind_serde() {
        let kind: NodeKind = serde_json::from_str("\"intelligence\"").unwrap();
        assert_eq!(kind, NodeKind::Intelligence);
        assert_eq!(serde_json::to_string(&NodeKind::Transform).unwrap(), "\"transform\"");
    }

    #[test]
    fn defaults_fill_in() {
        let defaults: NodeDefaults = serde_json::from_str("{}").unwrap();
        assert_eq!(defaults.max_retries, 3);
        assert_eq!(defaults.timeout_seconds, 300);
    }

    #[test]
    fn config_deserializes_schema_example() {
        let config: DefinitionConfig = serde_json::from_value(serde_json::json!({
            "version": "1.0",
            "defaults": {"max_retries": 2},
            "nodes": [
                {"id": "ctx", "type": "context", "config": {"include": ["cpu"]}, "next": "n"},
                {"id": "n", "type": "notify", "config": {"drivers": ["generic"]}, "required": false}
            ]
        }))
        .unwrap();

        assert_eq!(config.version, "1.0");
        assert_eq!(config.defaults.max_retries, 2);
        assert_eq!(config.defaults.timeout_seconds, 300);
        assert_eq!(config.nodes.len(), 2);
        assert_eq!(config.nodes[0].kind, NodeKind::Context);
        assert!(config.nodes[0].required, "required defaults to true");
        assert_eq!(config.nodes[0].next.as_deref(), Some("n"));
        assert!(!config.nodes[1].required);
    }

    #[test]
    fn definition_starts_at_version_one() {
        let config: DefinitionConfig =
            serde_json::from_value(serde_json::json!({"version": "1.0", "nodes": []})).unwrap();
        let definition = PipelineDefinition::new("triage", config);
        assert_eq!(definition.version, 1);
        assert!(definition.is_active);
    }
}
