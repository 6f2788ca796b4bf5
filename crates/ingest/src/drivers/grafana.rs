use klaxon_core::{AlertStatus, NormalizedAlert, Severity};

use crate::driver::SourceDriver;
use crate::error::IngestError;

use super::string_map;

/// Grafana (legacy alerting) webhook driver.
///
/// Flat payload: `{title, ruleId, ruleName, state, message, tags}`.
/// `state` is `alerting`, `ok`, or `no_data`; severity comes from the
/// `severity` tag when present.
pub struct GrafanaDriver;

impl SourceDriver for GrafanaDriver {
    fn name(&self) -> &str {
        "grafana"
    }

    fn priority(&self) -> i32 {
        20
    }

    fn probe(&self, payload: &serde_json::Value) -> bool {
        payload.is_object()
            && (payload.get("ruleName").is_some() || payload.get("evalMatches").is_some())
    }

    fn normalize(
        &self,
        payload: &serde_json::Value,
    ) -> Result<Vec<NormalizedAlert>, IngestError> {
        let name = payload
            .get("ruleName")
            .or_else(|| payload.get("title"))
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| {
                IngestError::MalformedPayload("grafana payload has no ruleName or title".into())
            })?
            .to_owned();

        let state = payload
            .get("state")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("alerting");
        let status = if state == "ok" {
            AlertStatus::Resolved
        } else {
            AlertStatus::Firing
        };

        let mut labels = string_map(payload.get("tags"));
        if let Some(rule_id) = payload.get("ruleId")
            && let Some(id) = rule_id.as_i64()
        {
            labels.insert("rule_id".to_owned(), id.to_string());
        }

        let severity = labels
            .get("severity")
            .and_then(|s| s.parse::<Severity>().ok())
            .unwrap_or(Severity::Warning);

        let mut alert = NormalizedAlert::new(self.name(), name, severity, status)
            .with_raw_payload(payload.clone());
        alert.labels = labels;
        if let Some(message) = payload.get("message").and_then(serde_json::Value::as_str) {
            alert = alert.with_annotation("message", message);
        }
        Ok(vec![alert])
    }
}
