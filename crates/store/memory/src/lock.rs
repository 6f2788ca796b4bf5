use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;
use uuid::Uuid;

use klaxon_store::error::StoreError;
use klaxon_store::lock::{FingerprintLock, LockGuard};

/// Internal entry representing a held lock.
#[derive(Debug, Clone)]
struct LockEntry {
    owner: String,
    expires_at: Instant,
}

impl LockEntry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// In-memory [`FingerprintLock`] backed by a [`DashMap`].
///
/// Lock expiry is lazy: expired entries are evicted on the next acquire
/// attempt for the same name. Suitable for single-process deployments and
/// tests; multi-worker deployments need the storage-backed lock.
#[derive(Debug, Clone, Default)]
pub struct MemoryFingerprintLock {
    locks: Arc<DashMap<String, LockEntry>>,
}

impl MemoryFingerprintLock {
    /// Create a new in-memory lock manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FingerprintLock for MemoryFingerprintLock {
    async fn try_acquire(
        &self,
        name: &str,
        ttl: Duration,
    ) -> Result<Option<Box<dyn LockGuard>>, StoreError> {
        let key = name.to_owned();

        // Remove expired entries lazily.
        self.locks.remove_if(&key, |_, entry| entry.is_expired());

        let owner = Uuid::new_v4().to_string();
        match self.locks.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(None),
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(LockEntry {
                    owner: owner.clone(),
                    expires_at: Instant::now() + ttl,
                });
                Ok(Some(Box::new(MemoryLockGuard {
                    locks: Arc::clone(&self.locks),
                    name: key,
                    owner,
                })))
            }
        }
    }

    async fn acquire(
        &self,
        name: &str,
        ttl: Duration,
        timeout: Duration,
    ) -> Result<Box<dyn LockGuard>, StoreError> {
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(guard) = self.try_acquire(name, ttl).await? {
                return Ok(guard);
            }

            if Instant::now() >= deadline {
                return Err(StoreError::Timeout(timeout));
            }

            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// Guard for a lock acquired via [`MemoryFingerprintLock`].
#[derive(Debug)]
pub struct MemoryLockGuard {
    locks: Arc<DashMap<String, LockEntry>>,
    name: String,
    owner: String,
}

#[async_trait]
impl LockGuard for MemoryLockGuard {
    async fn extend(&self, duration: Duration) -> Result<(), StoreError> {
        let mut entry = self
            .locks
            .get_mut(&self.name)
            .ok_or_else(|| StoreError::LockExpired(self.name.clone()))?;

        if entry.owner != self.owner || entry.is_expired() {
            return Err(StoreError::LockExpired(self.name.clone()));
        }

        entry.expires_at = Instant::now() + duration;
        Ok(())
    }

    async fn release(self: Box<Self>) -> Result<(), StoreError> {
        // Only remove if we are still the owner.
        self.locks
            .remove_if(&self.name, |_, entry| entry.owner == self.owner);
        Ok(())
    }

    async fn is_held(&self) -> Result<bool, StoreError> {
        match self.locks.get(&self.name) {
            Some(entry) => Ok(entry.owner == self.owner && !entry.is_expired()),
            None => Ok(false),
        }
    }
}
