use klaxon_core::{AlertStatus, NormalizedAlert, Severity, extract_path, path_str};

use crate::driver::SourceDriver;
use crate::error::IngestError;

use super::string_map;

/// OpsGenie integration webhook driver.
///
/// Payload: `{action, alert: {alertId, message, priority, tags, details}}`.
/// `action` is `Create`/`Close`; priorities P1–P5 fold into the platform's
/// severity levels.
pub struct OpsGenieDriver;

fn fold_priority(raw: Option<&str>) -> Severity {
    match raw {
        Some("P1" | "P2") => Severity::Critical,
        Some("P3") => Severity::Warning,
        Some("P4" | "P5") => Severity::Info,
        _ => Severity::Warning,
    }
}

impl SourceDriver for OpsGenieDriver {
    fn name(&self) -> &str {
        "opsgenie"
    }

    fn priority(&self) -> i32 {
        70
    }

    fn probe(&self, payload: &serde_json::Value) -> bool {
        path_str(payload, "alert.alertId").is_some()
    }

    fn normalize(
        &self,
        payload: &serde_json::Value,
    ) -> Result<Vec<NormalizedAlert>, IngestError> {
        let name = path_str(payload, "alert.message")
            .ok_or_else(|| {
                IngestError::MalformedPayload("opsgenie payload has no alert.message".into())
            })?
            .to_owned();
        let alert_id = path_str(payload, "alert.alertId")
            .ok_or_else(|| {
                IngestError::MalformedPayload("opsgenie payload has no alert.alertId".into())
            })?
            .to_owned();

        let action = payload
            .get("action")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("Create");
        let status = if action.eq_ignore_ascii_case("close") {
            AlertStatus::Resolved
        } else {
            AlertStatus::Firing
        };

        let severity = fold_priority(path_str(payload, "alert.priority"));

        let mut alert = NormalizedAlert::new(self.name(), name, severity, status)
            .with_raw_payload(payload.clone())
            .with_label("alert_id", alert_id);
        if let Some(serde_json::Value::Array(tags)) = extract_path(payload, "alert.tags") {
            for tag in tags {
                if let Some(tag) = tag.as_str() {
                    alert = alert.with_label(format!("tag:{tag}"), "true");
                }
            }
        }
        for (key, value) in string_map(extract_path(payload, "alert.details")) {
            alert = alert.with_annotation(key, value);
        }
        Ok(vec![alert])
    }
}
