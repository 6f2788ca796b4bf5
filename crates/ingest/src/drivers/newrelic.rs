use klaxon_core::{AlertStatus, NormalizedAlert, Severity};

use crate::driver::SourceDriver;
use crate::error::IngestError;

/// New Relic alert notification driver.
///
/// Flat payload: `{incident_id, condition_name, current_state, severity,
/// details, policy_name}`. `current_state` is `open`, `acknowledged`, or
/// `closed`.
pub struct NewRelicDriver;

impl SourceDriver for NewRelicDriver {
    fn name(&self) -> &str {
        "newrelic"
    }

    fn priority(&self) -> i32 {
        40
    }

    fn probe(&self, payload: &serde_json::Value) -> bool {
        payload.get("condition_name").is_some() && payload.get("current_state").is_some()
    }

    fn normalize(
        &self,
        payload: &serde_json::Value,
    ) -> Result<Vec<NormalizedAlert>, IngestError> {
        let name = payload
            .get("condition_name")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| {
                IngestError::MalformedPayload("newrelic payload has no condition_name".into())
            })?
            .to_owned();

        let state = payload
            .get("current_state")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("open");
        let status = if state == "closed" {
            AlertStatus::Resolved
        } else {
            AlertStatus::Firing
        };

        // New Relic incidents default to critical unless the condition says
        // otherwise.
        let severity = payload
            .get("severity")
            .and_then(serde_json::Value::as_str)
            .map(str::to_ascii_lowercase)
            .and_then(|s| s.parse::<Severity>().ok())
            .unwrap_or(Severity::Critical);

        let mut alert = NormalizedAlert::new(self.name(), name, severity, status)
            .with_raw_payload(payload.clone());
        if let Some(policy) = payload.get("policy_name").and_then(serde_json::Value::as_str) {
            alert = alert.with_label("policy", policy);
        }
        if let Some(id) = payload.get("incident_id") {
            let rendered = match id {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            alert = alert.with_label("incident_id", rendered);
        }
        if let Some(details) = payload.get("details").and_then(serde_json::Value::as_str) {
            alert = alert.with_annotation("details", details);
        }
        Ok(vec![alert])
    }
}
