use klaxon_core::{AlertStatus, NormalizedAlert, Severity};

use crate::driver::SourceDriver;
use crate::error::IngestError;

use super::{parse_timestamp, string_map};

/// Prometheus Alertmanager webhook driver.
///
/// Payload shape: `{alerts: [{status, labels, annotations, startsAt,
/// endsAt, fingerprint?}], ...}`. The alert name comes from the
/// `alertname` label and the severity from the `severity` label.
pub struct AlertmanagerDriver;

fn severity_from_label(label: Option<&str>) -> Severity {
    match label {
        Some("critical") => Severity::Critical,
        Some("info") => Severity::Info,
        Some("success") => Severity::Success,
        // Alertmanager has no fixed severity vocabulary; anything else is
        // treated as a warning.
        _ => Severity::Warning,
    }
}

impl SourceDriver for AlertmanagerDriver {
    fn name(&self) -> &str {
        "alertmanager"
    }

    fn priority(&self) -> i32 {
        10
    }

    fn probe(&self, payload: &serde_json::Value) -> bool {
        payload
            .get("alerts")
            .is_some_and(serde_json::Value::is_array)
    }

    fn normalize(
        &self,
        payload: &serde_json::Value,
    ) -> Result<Vec<NormalizedAlert>, IngestError> {
        let alerts = payload
            .get("alerts")
            .and_then(serde_json::Value::as_array)
            .ok_or_else(|| {
                IngestError::MalformedPayload("alertmanager payload has no alerts array".into())
            })?;

        let mut normalized = Vec::with_capacity(alerts.len());
        for alert in alerts {
            let labels = string_map(alert.get("labels"));
            let annotations = string_map(alert.get("annotations"));
            let name = labels
                .get("alertname")
                .cloned()
                .ok_or_else(|| {
                    IngestError::MalformedPayload("alert has no alertname label".into())
                })?;
            let status = match alert.get("status").and_then(serde_json::Value::as_str) {
                Some("resolved") => AlertStatus::Resolved,
                _ => AlertStatus::Firing,
            };
            let severity = severity_from_label(labels.get("severity").map(String::as_str));

            let mut entry = NormalizedAlert::new(self.name(), name, severity, status)
                .with_raw_payload(alert.clone());
            entry.labels = labels;
            entry.annotations = annotations;
            entry.starts_at = parse_timestamp(alert.get("startsAt"));
            entry.ends_at = parse_timestamp(alert.get("endsAt"));
            if let Some(fingerprint) = alert.get("fingerprint").and_then(serde_json::Value::as_str)
            {
                entry.fingerprint = Some(fingerprint.to_owned());
            }
            normalized.push(entry);
        }
        Ok(normalized)
    }
}
