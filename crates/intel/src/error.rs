use thiserror::Error;

/// Errors from intelligence provider operations.
#[derive(Debug, Error)]
pub enum IntelError {
    /// The provider rejected or failed the analysis call.
    #[error("provider error: {0}")]
    Provider(String),

    /// The provider did not answer within the deadline.
    #[error("timeout after {0:?}")]
    Timeout(std::time::Duration),

    /// The provider configuration is invalid (missing credentials, bad
    /// model name).
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The provider endpoint could not be reached.
    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

impl IntelError {
    /// Returns `true` if the analysis may succeed on retry.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Unavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(IntelError::Timeout(std::time::Duration::from_secs(1)).is_retryable());
        assert!(IntelError::Unavailable("503".into()).is_retryable());
        assert!(!IntelError::Provider("refused".into()).is_retryable());
        assert!(!IntelError::Configuration("no api key".into()).is_retryable());
    }
}
