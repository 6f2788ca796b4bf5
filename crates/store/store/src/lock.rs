use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;

/// A held fingerprint lock. Dropping without explicit release is allowed
/// (the lock expires after its TTL, or when the holder's connection drops),
/// but explicit release is preferred.
#[async_trait]
pub trait LockGuard: Send + Sync {
    /// Extend the lock's TTL. Backends without TTL semantics may no-op.
    async fn extend(&self, duration: Duration) -> Result<(), StoreError>;

    /// Explicitly release the lock.
    async fn release(self: Box<Self>) -> Result<(), StoreError>;

    /// Check if the lock is still held by this guard.
    async fn is_held(&self) -> Result<bool, StoreError>;
}

/// Serializes normalization per fingerprint.
///
/// Lock names are `alert:{fingerprint}`. The lock must be backed by shared
/// storage (advisory lock, canonical row lock) rather than process memory so
/// the single-firing-per-fingerprint invariant holds across workers; the
/// in-memory implementation exists for single-process deployments and tests.
#[async_trait]
pub trait FingerprintLock: Send + Sync {
    /// Try to acquire a lock with the given name and TTL.
    /// Returns `None` if the lock is held by another owner.
    async fn try_acquire(
        &self,
        name: &str,
        ttl: Duration,
    ) -> Result<Option<Box<dyn LockGuard>>, StoreError>;

    /// Acquire a lock, waiting up to `timeout` for it to become available.
    async fn acquire(
        &self,
        name: &str,
        ttl: Duration,
        timeout: Duration,
    ) -> Result<Box<dyn LockGuard>, StoreError>;
}
