use async_trait::async_trait;

use klaxon_core::{
    Analysis, CheckStatus, Recommendation, RecommendationPriority, Severity,
};

use crate::error::IntelError;
use crate::provider::{AnalysisRequest, IntelProvider};

/// The local rule engine: a small table of severity- and check-driven rules
/// producing canned recommendations.
///
/// This provider is the universal fallback. It holds no state, needs no
/// credentials, and never fails; when an AI-backed provider errors, its
/// output substitutes so an analysis stage always has recommendations.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalRuleProvider;

impl LocalRuleProvider {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl IntelProvider for LocalRuleProvider {
    fn name(&self) -> &str {
        "local"
    }

    async fn analyze(&self, request: &AnalysisRequest) -> Result<Analysis, IntelError> {
        let mut recommendations = Vec::new();

        if let Some(incident) = &request.incident {
            match incident.severity {
                Severity::Critical => recommendations.push(
                    Recommendation::new(
                        "Escalate to the on-call engineer",
                        format!(
                            "Incident \"{}\" is critical; page the on-call rotation and \
                             acknowledge the incident.",
                            incident.title
                        ),
                        RecommendationPriority::High,
                    )
                    .with_category("escalation"),
                ),
                Severity::Warning => recommendations.push(
                    Recommendation::new(
                        "Review the incident during business hours",
                        format!(
                            "Incident \"{}\" is a warning; schedule a review before it \
                             degrades further.",
                            incident.title
                        ),
                        RecommendationPriority::Medium,
                    )
                    .with_category("triage"),
                ),
                Severity::Info | Severity::Success => {}
            }
        }

        for check in &request.checks {
            match check.status {
                CheckStatus::Critical => recommendations.push(
                    Recommendation::new(
                        format!("Investigate {} on {}", check.checker_name, check.hostname),
                        format!(
                            "The {} check reported critical: {}",
                            check.checker_name, check.message
                        ),
                        RecommendationPriority::High,
                    )
                    .with_category("diagnostics"),
                ),
                CheckStatus::Warning => recommendations.push(
                    Recommendation::new(
                        format!("Monitor {} on {}", check.checker_name, check.hostname),
                        format!(
                            "The {} check reported a warning: {}",
                            check.checker_name, check.message
                        ),
                        RecommendationPriority::Medium,
                    )
                    .with_category("diagnostics"),
                ),
                CheckStatus::Unknown => recommendations.push(
                    Recommendation::new(
                        format!("Fix the {} probe", check.checker_name),
                        format!(
                            "The {} check could not run: {}",
                            check.checker_name,
                            check.error.as_deref().unwrap_or("unknown error")
                        ),
                        RecommendationPriority::Low,
                    )
                    .with_category("tooling"),
                ),
                CheckStatus::Ok => {}
            }
        }

        if recommendations.is_empty() {
            recommendations.push(
                Recommendation::new(
                    "No action required",
                    "All diagnostics passed and no severe incident context was found.",
                    RecommendationPriority::Low,
                )
                .with_category("status"),
            );
        }

        Ok(Analysis {
            recommendations,
            total_tokens: None,
        })
    }
}
