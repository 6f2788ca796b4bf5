use thiserror::Error;

/// Errors from notification driver operations.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// The channel configuration is invalid for this driver.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The endpoint rejected the delivery permanently (4xx, bad recipient).
    #[error("delivery rejected: {0}")]
    Delivery(String),

    /// Network or transport failure.
    #[error("connection error: {0}")]
    Connection(String),

    /// The delivery did not complete within the deadline.
    #[error("timeout after {0:?}")]
    Timeout(std::time::Duration),

    /// The endpoint asked us to slow down.
    #[error("rate limited")]
    RateLimited,

    /// Message body could not be built or serialized.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl NotifyError {
    /// Returns `true` if redelivery may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Timeout(_) | Self::RateLimited
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(NotifyError::Connection("reset".into()).is_retryable());
        assert!(NotifyError::Timeout(std::time::Duration::from_secs(5)).is_retryable());
        assert!(NotifyError::RateLimited.is_retryable());
        assert!(!NotifyError::Configuration("no url".into()).is_retryable());
        assert!(!NotifyError::Delivery("unknown recipient".into()).is_retryable());
    }
}
