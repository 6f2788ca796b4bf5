use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::fingerprint::derive_fingerprint;
use crate::severity::{AlertStatus, Severity};

/// One observation from a monitoring source, as persisted.
///
/// At most one `firing` alert exists per fingerprint at any time; repeated
/// firing observations update the existing row instead of duplicating it.
/// The `firing -> resolved` transition is final for a fingerprint instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// Unique alert identifier.
    pub id: Uuid,
    /// Stable hash correlating observations of the same logical alert.
    pub fingerprint: String,
    /// Name of the source driver that produced this alert.
    pub source: String,
    /// Human-readable alert name (e.g. `HighCPU`).
    pub name: String,
    pub severity: Severity,
    pub status: AlertStatus,
    /// Key/value labels from the source.
    pub labels: BTreeMap<String, String>,
    /// Key/value annotations from the source.
    pub annotations: BTreeMap<String, String>,
    /// The original webhook payload, stored verbatim.
    pub raw_payload: serde_json::Value,
    /// Owning incident, if the alert has been correlated.
    pub incident_id: Option<Uuid>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    /// When this observation (or its latest update) was received.
    pub received_at: DateTime<Utc>,
}

impl Alert {
    /// Build a persisted alert from a normalized observation, assigning a
    /// fresh id and stamping `received_at`.
    #[must_use]
    pub fn from_normalized(normalized: &NormalizedAlert, fingerprint: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            fingerprint,
            source: normalized.source.clone(),
            name: normalized.name.clone(),
            severity: normalized.severity,
            status: normalized.status,
            labels: normalized.labels.clone(),
            annotations: normalized.annotations.clone(),
            raw_payload: normalized.raw_payload.clone(),
            incident_id: None,
            starts_at: normalized.starts_at,
            ends_at: normalized.ends_at,
            received_at: Utc::now(),
        }
    }
}

/// A source-independent alert produced by an ingest driver, before
/// deduplication and persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedAlert {
    /// Fingerprint supplied by the source, if it has a native one.
    pub fingerprint: Option<String>,
    pub source: String,
    pub name: String,
    pub severity: Severity,
    pub status: AlertStatus,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub raw_payload: serde_json::Value,
}

impl NormalizedAlert {
    /// Create a normalized alert with required fields.
    #[must_use]
    pub fn new(
        source: impl Into<String>,
        name: impl Into<String>,
        severity: Severity,
        status: AlertStatus,
    ) -> Self {
        Self {
            fingerprint: None,
            source: source.into(),
            name: name.into(),
            severity,
            status,
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            starts_at: None,
            ends_at: None,
            raw_payload: serde_json::Value::Null,
        }
    }

    /// Set the source-native fingerprint.
    #[must_use]
    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    /// Add a label.
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Add an annotation.
    #[must_use]
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Attach the original payload fragment this alert was normalized from.
    #[must_use]
    pub fn with_raw_payload(mut self, payload: serde_json::Value) -> Self {
        self.raw_payload = payload;
        self
    }

    /// The fingerprint to use for dedup: the source-native one when present,
    /// otherwise derived from `(source, name, sorted labels)`.
    #[must_use]
    pub fn resolved_fingerprint(&self) -> String {
        self.fingerprint
            .clone()
            .unwrap_or_else(|| derive_fingerprint(&self.source, &self.name, &self.labels))
    }
}

/// Append-only audit record of an alert status change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertHistory {
    pub id: Uuid,
    pub alert_id: Uuid,
    pub previous_status: AlertStatus,
    pub new_status: AlertStatus,
    pub details: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl AlertHistory {
    #[must_use]
    pub fn new(
        alert_id: Uuid,
        previous_status: AlertStatus,
        new_status: AlertStatus,
        details: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            alert_id,
            previous_status,
            new_status,
            details,
            recorded_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalized_builder() {
        let alert = NormalizedAlert::new(
            "alertmanager",
            "HighCPU",
            Severity::Critical,
            AlertStatus::Firing,
        )
        .with_label("instance", "web-01")
        .with_annotation("description", "CPU>90%");

        assert_eq!(alert.source, "alertmanager");
        assert_eq!(alert.labels.get("instance").map(String::as_str), Some("web-01"));
        assert!(alert.fingerprint.is_none());
    }

    #[test]
    fn resolved_fingerprint_prefers_native() {
        let alert = NormalizedAlert::new("src", "n", Severity::Info, AlertStatus::Firing)
            .with_fingerprint("native-fp");
        assert_eq!(alert.resolved_fingerprint(), "native-fp");
    }

    #[test]
    fn resolved_fingerprint_derives_when_absent() {
        let a = NormalizedAlert::new("src", "n", Severity::Info, AlertStatus::Firing)
            .with_label("k", "v");
        let b = NormalizedAlert::new("src", "n", Severity::Warning, AlertStatus::Resolved)
            .with_label("k", "v");
        // Severity and status do not participate in the fingerprint.
        assert_eq!(a.resolved_fingerprint(), b.resolved_fingerprint());
    }

    #[test]
    fn alert_from_normalized() {
        let normalized = NormalizedAlert::new(
            "grafana",
            "DiskFull",
            Severity::Warning,
            AlertStatus::Firing,
        )
        .with_raw_payload(serde_json::json!({"ruleName": "DiskFull"}));
        let fp = normalized.resolved_fingerprint();

        let alert = Alert::from_normalized(&normalized, fp.clone());
        assert_eq!(alert.fingerprint, fp);
        assert_eq!(alert.status, AlertStatus::Firing);
        assert!(alert.incident_id.is_none());
        assert_eq!(alert.raw_payload["ruleName"], "DiskFull");
    }

    #[test]
    fn alert_serde_roundtrip() {
        let normalized = NormalizedAlert::new("z", "n", Severity::Info, AlertStatus::Firing);
        let alert = Alert::from_normalized(&normalized, "fp".into());
        let json = serde_json::to_string(&alert).unwrap();
        let back: Alert = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, alert.id);
        assert_eq!(back.fingerprint, alert.fingerprint);
    }
}
