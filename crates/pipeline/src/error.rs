use thiserror::Error;

use klaxon_core::RunStatus;
use klaxon_store::StoreError;

/// Errors from the orchestration engines.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error("run {run_id} is not resumable from status {status}")]
    NotResumable { run_id: String, status: RunStatus },

    #[error("definition not found: {0}")]
    DefinitionNotFound(String),

    #[error("definition not active: {0}")]
    DefinitionInactive(String),

    /// Admission-time validation of a definition failed.
    #[error("definition invalid: {}", .0.join("; "))]
    DefinitionInvalid(Vec<String>),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl PipelineError {
    /// Returns `true` if re-submitting the operation may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_retryable(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formats() {
        let err = PipelineError::DefinitionInvalid(vec!["no nodes".into(), "bad id".into()]);
        assert_eq!(err.to_string(), "definition invalid: no nodes; bad id");

        let err = PipelineError::NotResumable {
            run_id: "r-1".into(),
            status: RunStatus::Notified,
        };
        assert!(err.to_string().contains("notified"));
    }

    #[test]
    fn retryability_follows_store() {
        assert!(PipelineError::Store(StoreError::Unavailable("x".into())).is_retryable());
        assert!(!PipelineError::RunNotFound("r".into()).is_retryable());
    }
}
