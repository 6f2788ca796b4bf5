use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Priority of a single recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationPriority {
    Low,
    Medium,
    High,
}

impl RecommendationPriority {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// One remediation suggestion produced by an intelligence provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub title: String,
    pub description: String,
    pub priority: RecommendationPriority,
    #[serde(default)]
    pub category: Option<String>,
}

impl Recommendation {
    #[must_use]
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        priority: RecommendationPriority,
    ) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            priority,
            category: None,
        }
    }

    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

/// The value an intelligence provider returns for one analysis call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Analysis {
    pub recommendations: Vec<Recommendation>,
    /// Token usage, when the provider reports it.
    pub total_tokens: Option<u64>,
}

/// Terminal status of an analysis execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    Succeeded,
    Failed,
    /// The configured provider failed and the local rule engine substituted.
    Fallback,
}

impl AnalysisStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Fallback => "fallback",
        }
    }
}

impl std::str::FromStr for AnalysisStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "fallback" => Ok(Self::Fallback),
            other => Err(format!("unknown analysis status: {other}")),
        }
    }
}

/// Persisted record of one execution of one intelligence provider for one
/// incident.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRun {
    pub id: Uuid,
    pub trace_id: String,
    pub pipeline_run_id: String,
    pub incident_id: Option<Uuid>,
    /// Name of the provider that was asked (not necessarily the one that
    /// answered: on fallback this stays the configured provider).
    pub provider: String,
    #[serde(default)]
    pub provider_config: serde_json::Value,
    pub recommendations: Vec<Recommendation>,
    pub total_tokens: Option<u64>,
    pub status: AnalysisStatus,
    pub error: Option<String>,
    pub executed_at: DateTime<Utc>,
}

impl AnalysisRun {
    #[must_use]
    pub fn new(
        trace_id: impl Into<String>,
        pipeline_run_id: impl Into<String>,
        incident_id: Option<Uuid>,
        provider: impl Into<String>,
        status: AnalysisStatus,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            trace_id: trace_id.into(),
            pipeline_run_id: pipeline_run_id.into(),
            incident_id,
            provider: provider.into(),
            provider_config: serde_json::Value::Null,
            recommendations: Vec::new(),
            total_tokens: None,
            status,
            error: None,
            executed_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_analysis(mut self, analysis: Analysis) -> Self {
        self.recommendations = analysis.recommendations;
        self.total_tokens = analysis.total_tokens;
        self
    }

    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    #[must_use]
    pub fn with_provider_config(mut self, config: serde_json::Value) -> Self {
        self.provider_config = config;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_ordering() {
        assert!(RecommendationPriority::High > RecommendationPriority::Medium);
        assert!(RecommendationPriority::Medium > RecommendationPriority::Low);
    }

    #[test]
    fn analysis_run_builder() {
        let analysis = Analysis {
            recommendations: vec![Recommendation::new(
                "Restart the service",
                "CPU saturation on web-01",
                RecommendationPriority::High,
            )],
            total_tokens: Some(128),
        };
        let run = AnalysisRun::new("trace-1", "run-1", None, "openai", AnalysisStatus::Succeeded)
            .with_analysis(analysis);
        assert_eq!(run.recommendations.len(), 1);
        assert_eq!(run.total_tokens, Some(128));
        assert!(run.error.is_none());
    }

    #[test]
    fn fallback_run_records_original_provider() {
        let run = AnalysisRun::new("t", "r", None, "claude", AnalysisStatus::Fallback)
            .with_error("upstream 503");
        assert_eq!(run.provider, "claude");
        assert_eq!(run.status, AnalysisStatus::Fallback);
        assert_eq!(run.error.as_deref(), Some("upstream 503"));
    }

    #[test]
    fn status_serde() {
        let json = serde_json::to_string(&AnalysisStatus::Fallback).unwrap();
        assert_eq!(json, "\"fallback\"");
    }
}
