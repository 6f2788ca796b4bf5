use thiserror::Error;

/// Errors a checker probe can fail with.
#[derive(Debug, Error)]
pub enum CheckError {
    /// The probe itself failed (subprocess error, parse failure, missing
    /// resource).
    #[error("probe failed: {0}")]
    Probe(String),

    /// The probe did not complete within its deadline.
    #[error("probe timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl CheckError {
    /// Returns `true` if re-running the probe may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(CheckError::Timeout(std::time::Duration::from_secs(5)).is_retryable());
        assert!(!CheckError::Probe("df exited 1".into()).is_retryable());
    }
}
