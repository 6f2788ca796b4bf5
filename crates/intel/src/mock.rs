//! Test doubles for provider-dependent code.

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;

use klaxon_core::{Analysis, Recommendation, RecommendationPriority};

use crate::error::IntelError;
use crate::provider::{AnalysisRequest, IntelProvider};

/// A provider that always succeeds with one canned recommendation.
pub struct MockProvider {
    name: String,
    calls: AtomicU32,
}

impl MockProvider {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            calls: AtomicU32::new(0),
        }
    }

    #[must_use]
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IntelProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn analyze(&self, _request: &AnalysisRequest) -> Result<Analysis, IntelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Analysis {
            recommendations: vec![Recommendation::new(
                format!("{} recommendation", self.name),
                "mock analysis output",
                RecommendationPriority::Medium,
            )],
            total_tokens: Some(42),
        })
    }
}

/// A provider that always fails with a retryable error.
pub struct FailingProvider {
    name: String,
}

impl FailingProvider {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
        }
    }
}

#[async_trait]
impl IntelProvider for FailingProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn analyze(&self, _request: &AnalysisRequest) -> Result<Analysis, IntelError> {
        Err(IntelError::Unavailable(format!(
            "{} upstream returned 503",
            self.name
        )))
    }
}
