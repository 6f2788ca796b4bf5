use klaxon_core::{AlertStatus, NormalizedAlert, Severity};

use crate::driver::SourceDriver;
use crate::error::IngestError;

/// Zabbix action webhook driver.
///
/// Flat payload: `{event_id, trigger, severity, status, host}`. Zabbix
/// severities (`Disaster`, `High`, `Average`, `Warning`, `Information`,
/// `Not classified`) fold into the platform's four levels; `status` is
/// `PROBLEM` or `OK`/`RESOLVED`.
pub struct ZabbixDriver;

fn fold_severity(raw: Option<&str>) -> Severity {
    match raw.map(str::to_ascii_lowercase).as_deref() {
        Some("disaster" | "high") => Severity::Critical,
        Some("average" | "warning") => Severity::Warning,
        Some("information" | "not classified") => Severity::Info,
        _ => Severity::Warning,
    }
}

impl SourceDriver for ZabbixDriver {
    fn name(&self) -> &str {
        "zabbix"
    }

    fn priority(&self) -> i32 {
        60
    }

    fn probe(&self, payload: &serde_json::Value) -> bool {
        payload.get("trigger").is_some() && payload.get("host").is_some()
    }

    fn normalize(
        &self,
        payload: &serde_json::Value,
    ) -> Result<Vec<NormalizedAlert>, IngestError> {
        let name = payload
            .get("trigger")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| IngestError::MalformedPayload("zabbix payload has no trigger".into()))?
            .to_owned();

        let raw_status = payload
            .get("status")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("PROBLEM");
        let status = if raw_status.eq_ignore_ascii_case("ok")
            || raw_status.eq_ignore_ascii_case("resolved")
        {
            AlertStatus::Resolved
        } else {
            AlertStatus::Firing
        };

        let severity =
            fold_severity(payload.get("severity").and_then(serde_json::Value::as_str));

        let mut alert = NormalizedAlert::new(self.name(), name, severity, status)
            .with_raw_payload(payload.clone());
        if let Some(host) = payload.get("host").and_then(serde_json::Value::as_str) {
            alert = alert.with_label("host", host);
        }
        if let Some(event_id) = payload.get("event_id") {
            let rendered = match event_id {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            alert = alert.with_label("event_id", rendered);
        }
        Ok(vec![alert])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn problem_payload() -> serde_json::Value {
        serde_json::json!({
            "event_id": "9001",
            "trigger": "Free disk space < 10% on /",
            "severity": "High",
            "status": "PROBLEM",
            "host": "db-01"
        })
    }

    #[test]
    fn probes_trigger_and_host() {
        assert!(ZabbixDriver.probe(&problem_payload()));
        assert!(!ZabbixDriver.probe(&serde_json::json!({"trigger": "x"})));
    }

    #[test]
    fn normalizes_problem() {
        let alerts = ZabbixDriver.normalize(&problem_payload()).unwrap();
        let alert = &alerts[0];
        assert_eq!(alert.severity, Severity::Critical, "High folds to critical");
        assert_eq!(alert.status, AlertStatus::Firing);
        assert_eq!(alert.labels.get("host").map(String::as_str), Some("db-01"));
    }

    #[test]
    fn severity_folding() {
        assert_eq!(fold_severity(Some("Disaster")), Severity::Critical);
        assert_eq!(fold_severity(Some("Average")), Severity::Warning);
        assert_eq!(fold_severity(Some("Information")), Severity::Info);
        assert_eq!(fold_severity(None), Severity::Warning);
    }

    #[test]
    fn ok_resolves() {
        let mut payload = problem_payload();
        payload["status"] = serde_json::json!("OK");
        let alerts = ZabbixDriver.normalize(&payload).unwrap();
        assert_eq!(alerts[0].status, AlertStatus::Resolved);
    }
}
