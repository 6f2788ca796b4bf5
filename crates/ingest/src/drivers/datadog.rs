use klaxon_core::{AlertStatus, NormalizedAlert, Severity};

use crate::driver::SourceDriver;
use crate::error::IngestError;

/// Datadog monitor webhook driver.
///
/// Payload: `{id, title, alert_type, alert_transition, body, tags}`.
/// `alert_type` is one of `error`, `warning`, `info`, `success`;
/// `alert_transition` is `Triggered` or `Recovered`. Tags arrive either as
/// a `"k:v,k:v"` string or an array of `"k:v"` strings.
pub struct DatadogDriver;

fn parse_tags(value: Option<&serde_json::Value>) -> Vec<(String, String)> {
    let mut tags = Vec::new();
    let mut push = |raw: &str| {
        let raw = raw.trim();
        if raw.is_empty() {
            return;
        }
        match raw.split_once(':') {
            Some((key, val)) => tags.push((key.to_owned(), val.to_owned())),
            None => tags.push((raw.to_owned(), String::new())),
        }
    };
    match value {
        Some(serde_json::Value::String(joined)) => {
            for raw in joined.split(',') {
                push(raw);
            }
        }
        Some(serde_json::Value::Array(items)) => {
            for item in items {
                if let Some(raw) = item.as_str() {
                    push(raw);
                }
            }
        }
        _ => {}
    }
    tags
}

impl SourceDriver for DatadogDriver {
    fn name(&self) -> &str {
        "datadog"
    }

    fn priority(&self) -> i32 {
        50
    }

    fn probe(&self, payload: &serde_json::Value) -> bool {
        payload.is_object()
            && (payload.get("alert_type").is_some() || payload.get("alert_transition").is_some())
    }

    fn normalize(
        &self,
        payload: &serde_json::Value,
    ) -> Result<Vec<NormalizedAlert>, IngestError> {
        let name = payload
            .get("title")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| IngestError::MalformedPayload("datadog payload has no title".into()))?
            .to_owned();

        let severity = match payload.get("alert_type").and_then(serde_json::Value::as_str) {
            Some("error") => Severity::Critical,
            Some("warning") => Severity::Warning,
            Some("success") => Severity::Success,
            _ => Severity::Info,
        };

        let transition = payload
            .get("alert_transition")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("Triggered");
        let status = if transition.eq_ignore_ascii_case("recovered")
            || transition.eq_ignore_ascii_case("recovery")
        {
            AlertStatus::Resolved
        } else {
            AlertStatus::Firing
        };

        let mut alert = NormalizedAlert::new(self.name(), name, severity, status)
            .with_raw_payload(payload.clone());
        for (key, value) in parse_tags(payload.get("tags")) {
            alert = alert.with_label(key, value);
        }
        if let Some(id) = payload.get("id") {
            let rendered = match id {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            alert = alert.with_label("monitor_id", rendered);
        }
        if let Some(body) = payload.get("body").and_then(serde_json::Value::as_str) {
            alert = alert.with_annotation("body", body);
        }
        Ok(vec![alert])
    }
}
