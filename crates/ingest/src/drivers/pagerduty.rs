use klaxon_core::{AlertStatus, NormalizedAlert, Severity, path_str};

use crate::driver::SourceDriver;
use crate::error::IngestError;

/// PagerDuty webhook (v3) driver.
///
/// Payload shape: `{event: {id, event_type, data: {id, title, urgency,
/// service: {summary}}}}`. `event_type` values like `incident.triggered`
/// and `incident.resolved` map to firing/resolved; urgency maps to
/// severity.
pub struct PagerDutyDriver;

impl SourceDriver for PagerDutyDriver {
    fn name(&self) -> &str {
        "pagerduty"
    }

    fn priority(&self) -> i32 {
        30
    }

    fn probe(&self, payload: &serde_json::Value) -> bool {
        path_str(payload, "event.event_type").is_some()
    }

    fn normalize(
        &self,
        payload: &serde_json::Value,
    ) -> Result<Vec<NormalizedAlert>, IngestError> {
        let event_type = path_str(payload, "event.event_type").ok_or_else(|| {
            IngestError::MalformedPayload("pagerduty payload has no event.event_type".into())
        })?;
        let title = path_str(payload, "event.data.title")
            .ok_or_else(|| {
                IngestError::MalformedPayload("pagerduty payload has no event.data.title".into())
            })?
            .to_owned();

        let status = if event_type.ends_with("resolved") {
            AlertStatus::Resolved
        } else {
            AlertStatus::Firing
        };
        let severity = match path_str(payload, "event.data.urgency") {
            Some("high") => Severity::Critical,
            Some("low") => Severity::Warning,
            _ => Severity::Warning,
        };

        let mut alert = NormalizedAlert::new(self.name(), title, severity, status)
            .with_raw_payload(payload.clone());
        if let Some(incident_id) = path_str(payload, "event.data.id") {
            alert = alert.with_label("incident_id", incident_id);
        }
        if let Some(service) = path_str(payload, "event.data.service.summary") {
            alert = alert.with_label("service", service);
        }
        Ok(vec![alert])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triggered_payload() -> serde_json::Value {
        serde_json::json!({
            "event": {
                "id": "evt-1",
                "event_type": "incident.triggered",
                "data": {
                    "id": "PD-123",
                    "title": "Database unreachable",
                    "urgency": "high",
                    "service": {"summary": "postgres-prod"}
                }
            }
        })
    }

    #[test]
    fn probes_event_type() {
        assert!(PagerDutyDriver.probe(&triggered_payload()));
        assert!(!PagerDutyDriver.probe(&serde_json::json!({"event": {}})));
    }

    #[test]
    fn normalizes_triggered_incident() {
        let alerts = PagerDutyDriver.normalize(&triggered_payload()).unwrap();
        let alert = &alerts[0];
        assert_eq!(alert.name, "Database unreachable");
        assert_eq!(alert.severity, Severity::Critical);
        assert_eq!(alert.status, AlertStatus::Firing);
        assert_eq!(alert.labels.get("incident_id").map(String::as_str), Some("PD-123"));
        assert_eq!(alert.labels.get("service").map(String::as_str), Some("postgres-prod"));
    }

    #[test]
    fn resolved_event_resolves_same_fingerprint() {
        let mut payload = triggered_payload();
        payload["event"]["event_type"] = serde_json::json!("incident.resolved");
        payload["event"]["data"]["urgency"] = serde_json::json!("low");

        let firing = PagerDutyDriver.normalize(&triggered_payload()).unwrap();
        let resolved = PagerDutyDriver.normalize(&payload).unwrap();
        assert_eq!(resolved[0].status, AlertStatus::Resolved);
        // Same incident id and title: the derived fingerprints must agree so
        // the resolve finds the firing alert.
        assert_eq!(
            firing[0].resolved_fingerprint(),
            resolved[0].resolved_fingerprint()
        );
    }
}
