use std::collections::HashMap;
use std::time::Duration;

use uuid::Uuid;

/// Everything a stage executor may read for one execution.
///
/// Previous stage outputs are immutable once written; stages read them and
/// return new output, they never mutate the context.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub trace_id: String,
    pub run_id: String,
    pub incident_id: Option<Uuid>,
    pub source: Option<String>,
    pub environment: String,
    /// The raw payload the run was submitted with.
    pub payload: serde_json::Value,
    /// Outputs of previously succeeded stages, keyed by stage name.
    pub previous_outputs: HashMap<String, serde_json::Value>,
    /// Stage-specific configuration from the engine config.
    pub stage_config: serde_json::Value,
    /// Deadline for external calls inside the stage.
    pub deadline: Duration,
}

/// Pull an `incident_id` field out of a stage or node output so the engine
/// can hoist it onto the run and into the shared context.
#[must_use]
pub fn extract_incident_id(output: &serde_json::Value) -> Option<Uuid> {
    output
        .get("incident_id")
        .and_then(serde_json::Value::as_str)
        .and_then(|raw| Uuid::parse_str(raw).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_uuid_incident_id() {
        let id = Uuid::new_v4();
        let output = serde_json::json!({"incident_id": id.to_string(), "alerts_created": 1});
        assert_eq!(extract_incident_id(&output), Some(id));
    }

    #[test]
    fn ignores_null_and_malformed() {
        assert!(extract_incident_id(&serde_json::json!({"incident_id": null})).is_none());
        assert!(extract_incident_id(&serde_json::json!({"incident_id": "not-a-uuid"})).is_none());
        assert!(extract_incident_id(&serde_json::json!({})).is_none());
        assert!(extract_incident_id(&serde_json::json!(42)).is_none());
    }
}
