use klaxon_core::{Incident, Severity};
use minijinja::Environment;

use crate::driver::NotificationMessage;
use crate::error::NotifyError;

/// Body template rendered for every notification. Sections are omitted when
/// the corresponding stage output is absent.
const BODY_TEMPLATE: &str = "\
{{ title }}
Severity: {{ severity }}
{% if incident %}
Incident: {{ incident.title }} ({{ incident.status }})
{{ incident.description }}
{% endif %}\
{% if checks %}
Checks: {{ checks.checks_passed }}/{{ checks.checks_run }} passed \
({{ checks.critical }} critical, {{ checks.warning }} warning)
{% endif %}\
{% if recommendations %}
Recommendations:
{% for rec in recommendations %}- [{{ rec.priority }}] {{ rec.title }}: {{ rec.description }}
{% endfor %}{% endif %}";

/// Build the notification message from prior stage outputs.
///
/// Title and severity prefer the incident; without one they are derived from
/// the check summary counts. The body is a templated summary of incident,
/// checks, and recommendations.
pub fn build_message(
    trace_id: &str,
    incident: Option<&Incident>,
    check_output: Option<&serde_json::Value>,
    recommendations: Option<&serde_json::Value>,
) -> Result<NotificationMessage, NotifyError> {
    let severity = incident.map_or_else(
        || severity_from_checks(check_output),
        |incident| incident.severity,
    );

    let title = match incident {
        Some(incident) => incident.title.clone(),
        None => title_from_checks(check_output),
    };

    let context = serde_json::json!({
        "title": title,
        "severity": severity.as_str(),
        "incident": incident,
        "checks": check_output,
        "recommendations": recommendations,
    });

    let mut env = Environment::new();
    env.add_template("body", BODY_TEMPLATE)
        .map_err(|e| NotifyError::Serialization(e.to_string()))?;
    let body = env
        .get_template("body")
        .map_err(|e| NotifyError::Serialization(e.to_string()))?
        .render(minijinja::Value::from_serialize(&context))
        .map_err(|e| NotifyError::Serialization(e.to_string()))?;

    Ok(NotificationMessage {
        title,
        body,
        severity,
        dedup_key: format!("{trace_id}:notify"),
        trace_id: trace_id.to_owned(),
        incident_id: incident.map(|i| i.id),
        metadata: serde_json::Value::Null,
    })
}

fn count(output: Option<&serde_json::Value>, key: &str) -> u64 {
    output
        .and_then(|v| v.get(key))
        .and_then(serde_json::Value::as_u64)
        .unwrap_or(0)
}

fn severity_from_checks(check_output: Option<&serde_json::Value>) -> Severity {
    if count(check_output, "critical") > 0 {
        Severity::Critical
    } else if count(check_output, "warning") > 0 || count(check_output, "unknown") > 0 {
        Severity::Warning
    } else {
        Severity::Info
    }
}

fn title_from_checks(check_output: Option<&serde_json::Value>) -> String {
    let run = count(check_output, "checks_run");
    let critical = count(check_output, "critical");
    let warning = count(check_output, "warning");
    if run == 0 {
        "Pipeline notification".to_owned()
    } else {
        format!("{run} checks: {critical} critical, {warning} warning")
    }
}

#[cfg(test)]
mod tests {
    use klaxon_core::Severity;

    use super::*;

    #[test]
    fn incident_drives_title_and_severity() {
        let incident = Incident::new("High CPU on web-01", "CPU>90%", Severity::Critical, "fp");
        let message = build_message("trace-1", Some(&incident), None, None).unwrap();

        assert_eq!(message.title, "High CPU on web-01");
        assert_eq!(message.severity, Severity::Critical);
        assert_eq!(message.incident_id, Some(incident.id));
        assert_eq!(message.dedup_key, "trace-1:notify");
        assert!(message.body.contains("High CPU on web-01"));
        assert!(message.body.contains("CPU>90%"));
    }

    #[test]
    fn checks_drive_fallback_title() {
        let checks = serde_json::json!({
            "checks_run": 4, "checks_passed": 2, "critical": 1, "warning": 1, "unknown": 0
        });
        let message = build_message("trace-2", None, Some(&checks), None).unwrap();

        assert_eq!(message.title, "4 checks: 1 critical, 1 warning");
        assert_eq!(message.severity, Severity::Critical);
        assert!(message.body.contains("2/4 passed"));
    }

    #[test]
    fn recommendations_render_in_body() {
        let recommendations = serde_json::json!([
            {"title": "Restart nginx", "description": "worker wedged", "priority": "high"}
        ]);
        let message = build_message("trace-3", None, None, Some(&recommendations)).unwrap();

        assert!(message.body.contains("Recommendations:"));
        assert!(message.body.contains("[high] Restart nginx: worker wedged"));
    }

    #[test]
    fn quiet_checks_are_info() {
        let checks = serde_json::json!({
            "checks_run": 2, "checks_passed": 2, "critical": 0, "warning": 0, "unknown": 0
        });
        let message = build_message("trace-4", None, Some(&checks), None).unwrap();
        assert_eq!(message.severity, Severity::Info);
    }
}
