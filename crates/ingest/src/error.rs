use thiserror::Error;

use klaxon_store::StoreError;

/// Errors from webhook normalization and ingest.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The payload does not match the driver's (or any driver's) expected
    /// shape. Never retried.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The caller named a source driver that is not registered. Never
    /// retried.
    #[error("unknown source: {0}")]
    UnknownSource(String),

    /// A storage or lock operation failed. Retryable iff the underlying
    /// error is.
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    /// Every alert in the batch failed to apply.
    #[error("all {count} alerts failed: {detail}")]
    BatchFailed {
        count: usize,
        detail: String,
        retryable: bool,
    },
}

impl IngestError {
    /// Returns `true` if re-submitting the same payload may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::MalformedPayload(_) | Self::UnknownSource(_) => false,
            Self::Storage(e) => e.is_retryable(),
            Self::BatchFailed { retryable, .. } => *retryable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(!IngestError::MalformedPayload("not json".into()).is_retryable());
        assert!(!IngestError::UnknownSource("nagios".into()).is_retryable());
        assert!(IngestError::Storage(StoreError::Unavailable("down".into())).is_retryable());
        assert!(!IngestError::Storage(StoreError::Conflict("dup".into())).is_retryable());
        assert!(
            IngestError::BatchFailed {
                count: 2,
                detail: "db down".into(),
                retryable: true
            }
            .is_retryable()
        );
    }
}
