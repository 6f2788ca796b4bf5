use std::time::Duration;

/// Jitter source for retry delays.
///
/// `Fixed` pins the jitter term so tests get deterministic delays.
#[derive(Debug, Clone, Copy)]
pub enum Jitter {
    /// Uniform random term in `[0, 1)`.
    Random,
    /// Constant term (tests).
    Fixed(f64),
}

/// Exponential backoff with jitter:
/// `delay = base * 2^(attempt-1) * (0.5 + jitter)`, capped.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub jitter: Jitter,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(60),
            jitter: Jitter::Random,
        }
    }
}

impl RetryPolicy {
    /// A millisecond-scale policy with fixed jitter, for tests.
    #[must_use]
    pub fn fast() -> Self {
        Self {
            base: Duration::from_millis(1),
            cap: Duration::from_millis(50),
            jitter: Jitter::Fixed(0.5),
        }
    }

    /// Compute the delay before retrying after `attempt` (1-based) failed.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        // attempt is a small retry counter; the exponent cannot overflow in
        // practice and the result is capped anyway.
        #[allow(clippy::cast_possible_wrap)]
        let exponent = 2f64.powi((attempt - 1).min(31) as i32);
        let jitter = match self.jitter {
            Jitter::Random => rand::random::<f64>(),
            Jitter::Fixed(value) => value,
        };
        let raw = self.base.as_secs_f64() * exponent * (0.5 + jitter);
        Duration::from_secs_f64(raw.min(self.cap.as_secs_f64()))
    }
}
