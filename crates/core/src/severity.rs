use serde::{Deserialize, Serialize};

/// Severity of an alert or incident.
///
/// Ordered so that `Critical` is the greatest value: an incident's severity
/// is the maximum over its member alerts.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Success,
    Info,
    Warning,
    Critical,
}

impl Severity {
    /// Returns the lowercase label used in persisted records and API bodies.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "success" => Ok(Self::Success),
            "info" => Ok(Self::Info),
            "warning" => Ok(Self::Warning),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a single alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Firing,
    Resolved,
}

impl AlertStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Firing => "firing",
            Self::Resolved => "resolved",
        }
    }
}

impl std::str::FromStr for AlertStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "firing" => Ok(Self::Firing),
            "resolved" => Ok(Self::Resolved),
            other => Err(format!("unknown alert status: {other}")),
        }
    }
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operator-facing status of an incident.
///
/// Transitions are monotonic along open → acknowledged → resolved → closed;
/// skipping forward is allowed, moving backward never is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    Open,
    Acknowledged,
    Resolved,
    Closed,
}

impl IncidentStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Acknowledged => "acknowledged",
            Self::Resolved => "resolved",
            Self::Closed => "closed",
        }
    }

    fn rank(self) -> u8 {
        match self {
            Self::Open => 0,
            Self::Acknowledged => 1,
            Self::Resolved => 2,
            Self::Closed => 3,
        }
    }

    /// Whether the incident can still receive alerts and transitions.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }

    /// `true` when a transition from `self` to `next` respects the
    /// monotonic chain.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        next.rank() > self.rank()
    }
}

impl std::str::FromStr for IncidentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "acknowledged" => Ok(Self::Acknowledged),
            "resolved" => Ok(Self::Resolved),
            "closed" => Ok(Self::Closed),
            other => Err(format!("unknown incident status: {other}")),
        }
    }
}

impl std::fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome status of a single checker execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Ok,
    Warning,
    Critical,
    Unknown,
}

impl CheckStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Warning => "warning",
            Self::Critical => "critical",
            Self::Unknown => "unknown",
        }
    }
}

impl std::str::FromStr for CheckStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ok" => Ok(Self::Ok),
            "warning" => Ok(Self::Warning),
            "critical" => Ok(Self::Critical),
            "unknown" => Ok(Self::Unknown),
            other => Err(format!("unknown check status: {other}")),
        }
    }
}

impl std::fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering() {
        assert!(Severity::Critical > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
        assert!(Severity::Info > Severity::Success);
        assert_eq!(
            [Severity::Info, Severity::Critical, Severity::Warning]
                .into_iter()
                .max(),
            Some(Severity::Critical)
        );
    }

    #[test]
    fn severity_serde_roundtrip() {
        for sev in [
            Severity::Success,
            Severity::Info,
            Severity::Warning,
            Severity::Critical,
        ] {
            let json = serde_json::to_string(&sev).unwrap();
            let back: Severity = serde_json::from_str(&json).unwrap();
            assert_eq!(back, sev);
            assert_eq!(json.trim_matches('"'), sev.as_str());
        }
    }

    #[test]
    fn severity_parse() {
        assert_eq!("critical".parse::<Severity>().unwrap(), Severity::Critical);
        assert_eq!("CRITICAL".parse::<Severity>().unwrap(), Severity::Critical);
        assert!("fatal".parse::<Severity>().is_err());
    }

    #[test]
    fn incident_transitions_are_monotonic() {
        use IncidentStatus::{Acknowledged, Closed, Open, Resolved};

        assert!(Open.can_transition_to(Acknowledged));
        assert!(Open.can_transition_to(Resolved));
        assert!(Open.can_transition_to(Closed));
        assert!(Acknowledged.can_transition_to(Resolved));
        assert!(Resolved.can_transition_to(Closed));

        assert!(!Acknowledged.can_transition_to(Open));
        assert!(!Resolved.can_transition_to(Acknowledged));
        assert!(!Closed.can_transition_to(Open));
        assert!(!Closed.can_transition_to(Resolved));
        assert!(!Open.can_transition_to(Open));
    }

    #[test]
    fn closed_is_terminal() {
        assert!(IncidentStatus::Closed.is_terminal());
        assert!(!IncidentStatus::Resolved.is_terminal());
    }

    #[test]
    fn status_parse_roundtrip() {
        for s in ["open", "acknowledged", "resolved", "closed"] {
            assert_eq!(s.parse::<IncidentStatus>().unwrap().as_str(), s);
        }
        for s in ["firing", "resolved"] {
            assert_eq!(s.parse::<AlertStatus>().unwrap().as_str(), s);
        }
        for s in ["ok", "warning", "critical", "unknown"] {
            assert_eq!(s.parse::<CheckStatus>().unwrap().as_str(), s);
        }
    }
}
