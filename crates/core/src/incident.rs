use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::InvalidTransition;
use crate::severity::{IncidentStatus, Severity};

/// Operator-facing grouping of related alerts.
///
/// Opened when a firing alert has no open incident matching its grouping key
/// (default grouping key: the alert fingerprint). Severity is recomputed on
/// each member-alert update. Once closed, an incident is never mutated again;
/// a resolved incident that receives a new matching firing alert reopens as a
/// **new** incident.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    /// Maximum severity over member alerts.
    pub severity: Severity,
    pub status: IncidentStatus,
    /// The key new firing alerts are matched against (default: fingerprint).
    pub grouping_key: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Incident {
    /// Open a new incident.
    #[must_use]
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        severity: Severity,
        grouping_key: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            description: description.into(),
            severity,
            status: IncidentStatus::Open,
            grouping_key: grouping_key.into(),
            metadata: serde_json::Value::Null,
            created_at: now,
            updated_at: now,
            resolved_at: None,
        }
    }

    /// Apply a status transition, enforcing monotonicity.
    ///
    /// Stamps `updated_at`, and `resolved_at` when entering `resolved`.
    pub fn transition(&mut self, next: IncidentStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        if next == IncidentStatus::Resolved {
            self.resolved_at = Some(self.updated_at);
        }
        Ok(())
    }

    /// Raise the incident severity if `observed` is greater. Returns whether
    /// anything changed.
    pub fn observe_severity(&mut self, observed: Severity) -> bool {
        if observed > self.severity {
            self.severity = observed;
            self.updated_at = Utc::now();
            true
        } else {
            false
        }
    }
}
