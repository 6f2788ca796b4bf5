use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

use klaxon_core::ProviderConfig;
use klaxon_store::{Store, StoreError};

/// Snapshot cache over the active provider row.
///
/// The active provider is a process-wide singleton concern: readers take a
/// snapshot, the writer (a refresh) publishes atomically. The cache refreshes
/// from storage when its TTL lapses or when [`invalidate`](Self::invalidate)
/// is called after a config change.
pub struct ActiveProviderCache {
    store: Arc<dyn Store>,
    ttl: Duration,
    inner: RwLock<Option<CachedProvider>>,
}

struct CachedProvider {
    fetched_at: Instant,
    provider: Option<ProviderConfig>,
}

impl ActiveProviderCache {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            inner: RwLock::new(None),
        }
    }

    /// The currently active provider config, from cache or storage.
    pub async fn current(&self) -> Result<Option<ProviderConfig>, StoreError> {
        {
            let cached = self.inner.read().await;
            if let Some(entry) = cached.as_ref()
                && entry.fetched_at.elapsed() < self.ttl
            {
                return Ok(entry.provider.clone());
            }
        }

        let provider = self.store.active_provider().await?;
        let mut cached = self.inner.write().await;
        *cached = Some(CachedProvider {
            fetched_at: Instant::now(),
            provider: provider.clone(),
        });
        Ok(provider)
    }

    /// Drop the snapshot so the next read hits storage.
    pub async fn invalidate(&self) {
        *self.inner.write().await = None;
    }
}

#[cfg(test)]
mod tests {
    use klaxon_store_memory::MemoryStore;

    use super::*;

    #[tokio::test]
    async fn caches_until_invalidated() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let cache = ActiveProviderCache::new(Arc::clone(&store), Duration::from_secs(3600));

        assert!(cache.current().await.unwrap().is_none());

        // A new active provider is not visible until the snapshot refreshes.
        store
            .upsert_provider(&ProviderConfig::new("openai", serde_json::json!({})))
            .await
            .unwrap();
        assert!(cache.current().await.unwrap().is_none());

        cache.invalidate().await;
        let active = cache.current().await.unwrap().expect("refreshed");
        assert_eq!(active.provider_type, "openai");
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_expiry_refreshes() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let cache = ActiveProviderCache::new(Arc::clone(&store), Duration::from_secs(30));

        assert!(cache.current().await.unwrap().is_none());
        store
            .upsert_provider(&ProviderConfig::new("gemini", serde_json::json!({})))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(31)).await;
        let active = cache.current().await.unwrap().expect("refreshed after ttl");
        assert_eq!(active.provider_type, "gemini");
    }
}
