use klaxon_core::{AlertStatus, NormalizedAlert, Severity};

use crate::driver::SourceDriver;
use crate::error::IngestError;

use super::{parse_timestamp, string_map};

/// Catch-all driver for custom integrations.
///
/// Accepts any JSON object and reads the conventional fields when present:
/// `name`/`alertname`/`title`, `status`, `severity`, `labels`,
/// `annotations`, `fingerprint`, `starts_at`, `ends_at`. Always probes
/// last.
pub struct GenericDriver;

impl SourceDriver for GenericDriver {
    fn name(&self) -> &str {
        "generic"
    }

    fn priority(&self) -> i32 {
        i32::MAX
    }

    fn probe(&self, payload: &serde_json::Value) -> bool {
        payload.is_object()
    }

    fn normalize(
        &self,
        payload: &serde_json::Value,
    ) -> Result<Vec<NormalizedAlert>, IngestError> {
        if !payload.is_object() {
            return Err(IngestError::MalformedPayload(
                "generic payload must be a JSON object".into(),
            ));
        }

        let name = payload
            .get("name")
            .or_else(|| payload.get("alertname"))
            .or_else(|| payload.get("title"))
            .and_then(serde_json::Value::as_str)
            .unwrap_or("generic-alert")
            .to_owned();

        let status = match payload.get("status").and_then(serde_json::Value::as_str) {
            Some("resolved") => AlertStatus::Resolved,
            _ => AlertStatus::Firing,
        };
        let severity = payload
            .get("severity")
            .and_then(serde_json::Value::as_str)
            .and_then(|s| s.parse::<Severity>().ok())
            .unwrap_or(Severity::Warning);

        let mut alert = NormalizedAlert::new(self.name(), name, severity, status)
            .with_raw_payload(payload.clone());
        alert.labels = string_map(payload.get("labels"));
        alert.annotations = string_map(payload.get("annotations"));
        alert.starts_at = parse_timestamp(payload.get("starts_at"));
        alert.ends_at = parse_timestamp(payload.get("ends_at"));
        if let Some(fingerprint) = payload.get("fingerprint").and_then(serde_json::Value::as_str)
        {
            alert.fingerprint = Some(fingerprint.to_owned());
        }
        Ok(vec![alert])
    }
}
