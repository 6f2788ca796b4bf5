use std::time::Duration;

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::warn;

use klaxon_store::error::StoreError;
use klaxon_store::lock::{FingerprintLock, LockGuard};

/// [`FingerprintLock`] backed by PostgreSQL session advisory locks.
///
/// Each acquired lock pins one pooled connection for its lifetime; the
/// advisory lock is released explicitly, or implicitly when the connection
/// drops (a crashed holder therefore frees its locks when the pool reaps
/// the connection). The TTL parameter is accepted for interface parity but
/// not enforced; advisory locks have no server-side expiry.
pub struct PgFingerprintLock {
    pool: PgPool,
}

impl PgFingerprintLock {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FingerprintLock for PgFingerprintLock {
    async fn try_acquire(
        &self,
        name: &str,
        _ttl: Duration,
    ) -> Result<Option<Box<dyn LockGuard>>, StoreError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let locked: bool =
            sqlx::query_scalar("SELECT pg_try_advisory_lock(hashtextextended($1, 0))")
                .bind(name)
                .fetch_one(&mut *conn)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;

        if locked {
            Ok(Some(Box::new(PgLockGuard {
                conn: Mutex::new(Some(conn)),
                name: name.to_owned(),
            })))
        } else {
            // The connection goes back to the pool untouched.
            Ok(None)
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

            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

/// Guard for an advisory lock held on a pinned connection.
pub struct PgLockGuard {
    conn: Mutex<Option<PoolConnection<Postgres>>>,
    name: String,
}

#[async_trait]
impl LockGuard for PgLockGuard {
    async fn extend(&self, _duration: Duration) -> Result<(), StoreError> {
        // Advisory locks do not expire; nothing to extend.
        Ok(())
    }

    async fn release(self: Box<Self>) -> Result<(), StoreError> {
        let Some(mut conn) = self.conn.lock().await.take() else {
            return Ok(());
        };

        let released: bool =
            sqlx::query_scalar("SELECT pg_advisory_unlock(hashtextextended($1, 0))")
                .bind(&self.name)
                .fetch_one(&mut *conn)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;

        if !released {
            warn!(lock = %self.name, "advisory unlock reported no lock held");
        }
        Ok(())
    }

    async fn is_held(&self) -> Result<bool, StoreError> {
        Ok(self.conn.lock().await.is_some())
    }
}
