use thiserror::Error;

/// Errors from storage and lock operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend could not be reached. Retryable.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// A unique constraint rejected the write (duplicate idempotency key,
    /// second firing alert for a fingerprint, second open incident for a
    /// grouping key).
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("lock contention: {0}")]
    LockContention(String),

    #[error("lock expired: {0}")]
    LockExpired(String),

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Unexpected backend failure; the caller should treat run state as
    /// potentially inconsistent.
    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Returns `true` if the operation may succeed on retry.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Unavailable(_) | Self::Timeout(_) | Self::LockContention(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(StoreError::Unavailable("down".into()).is_retryable());
        assert!(StoreError::Timeout(std::time::Duration::from_secs(1)).is_retryable());
        assert!(StoreError::LockContention("busy".into()).is_retryable());
    }

    #[test]
    fn non_retryable_errors() {
        assert!(!StoreError::Conflict("dup".into()).is_retryable());
        assert!(!StoreError::NotFound("x".into()).is_retryable());
        assert!(!StoreError::Backend("corrupt".into()).is_retryable());
        assert!(!StoreError::Serialization("bad json".into()).is_retryable());
    }

    #[test]
    fn error_display() {
        let err = StoreError::Conflict("idempotency key exists".into());
        assert_eq!(err.to_string(), "conflict: idempotency key exists");
    }
}
