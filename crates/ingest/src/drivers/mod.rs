mod alertmanager;
mod datadog;
mod generic;
mod grafana;
mod newrelic;
mod opsgenie;
mod pagerduty;
mod zabbix;

pub use alertmanager::AlertmanagerDriver;
pub use datadog::DatadogDriver;
pub use generic::GenericDriver;
pub use grafana::GrafanaDriver;
pub use newrelic::NewRelicDriver;
pub use opsgenie::OpsGenieDriver;
pub use pagerduty::PagerDutyDriver;
pub use zabbix::ZabbixDriver;

use chrono::{DateTime, Utc};

/// Parse an RFC 3339 timestamp, treating the Go zero time Alertmanager emits
/// for unset fields as absent.
pub(crate) fn parse_timestamp(value: Option<&serde_json::Value>) -> Option<DateTime<Utc>> {
    let raw = value?.as_str()?;
    if raw.is_empty() || raw.starts_with("0001-01-01") {
        return None;
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Copy an object of scalar values into a string map, stringifying numbers
/// and booleans.
pub(crate) fn string_map(
    value: Option<&serde_json::Value>,
) -> std::collections::BTreeMap<String, String> {
    let mut map = std::collections::BTreeMap::new();
    if let Some(serde_json::Value::Object(object)) = value {
        for (key, value) in object {
            let rendered = match value {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::Bool(b) => b.to_string(),
                _ => continue,
            };
            map.insert(key.clone(), rendered);
        }
    }
    map
}
