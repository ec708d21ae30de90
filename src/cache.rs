//! In-memory TTL cache for dataset metadata.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::debug;

/// Default lifetime of a cached entry.
pub const DEFAULT_TTL: Duration = Duration::from_secs(600);

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

#[derive(Debug)]
struct CacheInner<V> {
    map: HashMap<String, CacheEntry<V>>,
    ttl: Duration,
}

impl<V: Clone> CacheInner<V> {
    fn get(&self, key: &str) -> Option<V> {
        self.map.get(key).and_then(|entry| {
            if Instant::now() <= entry.expires_at {
                Some(entry.value.clone())
            } else {
                None
            }
        })
    }

    fn put(&mut self, key: String, value: V) {
        let expires_at = Instant::now() + self.ttl;
        self.map.insert(key, CacheEntry { value, expires_at });
    }
}

/// Read-through cache shared by every clone of its handle.
///
/// Misses are not coalesced: two readers missing the same key at once both run the
/// loader and the last write wins. Loaders are expected to be idempotent.
#[derive(Debug)]
pub struct TtlCache<V> {
    inner: Arc<RwLock<CacheInner<V>>>,
}

impl<V> Clone for TtlCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(RwLock::new(CacheInner {
                map: HashMap::new(),
                ttl,
            })),
        }
    }

    pub async fn get(&self, key: &str) -> Option<V> {
        self.inner.read().await.get(key)
    }

    /// No-op when the TTL is zero.
    pub async fn put(&self, key: impl Into<String>, value: V) {
        let mut inner = self.inner.write().await;
        if inner.ttl.is_zero() {
            return;
        }
        inner.put(key.into(), value);
    }

    /// Return the cached value or run `load`, caching its success.
    pub async fn get_or_try_insert_with<F, Fut, E>(&self, key: &str, load: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(key).await {
            debug!(key, "cache hit");
            return Ok(value);
        }
        debug!(key, "cache miss");
        let value = load().await?;
        self.put(key, value.clone()).await;
        Ok(value)
    }

    pub async fn invalidate(&self, key: &str) {
        self.inner.write().await.map.remove(key);
    }

    pub async fn clear(&self) {
        self.inner.write().await.map.clear();
    }

    pub async fn clear_expired(&self) {
        let now = Instant::now();
        self.inner
            .write()
            .await
            .map
            .retain(|_, entry| entry.expires_at > now);
    }

    /// Number of entries, expired ones included.
    pub async fn len(&self) -> usize {
        self.inner.read().await.map.len()
    }
}

impl<V: Clone> Default for TtlCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn loader_runs_once_within_ttl() {
        let cache: TtlCache<String> = TtlCache::new(Duration::from_secs(60));
        let loads = AtomicUsize::new(0);

        for _ in 0..2 {
            let value = cache
                .get_or_try_insert_with("dataset:EDRVOL", || async {
                    loads.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ()>("definition".to_string())
                })
                .await
                .unwrap();
            assert_eq!(value, "definition");
        }

        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_loads_are_not_cached() {
        let cache: TtlCache<u32> = TtlCache::default();
        let first = cache
            .get_or_try_insert_with("k", || async { Err::<u32, _>("boom") })
            .await;
        assert!(first.is_err());
        let second = cache
            .get_or_try_insert_with("k", || async { Ok::<_, &str>(7) })
            .await;
        assert_eq!(second, Ok(7));
    }

    #[tokio::test]
    async fn zero_ttl_disables_caching() {
        let cache: TtlCache<u32> = TtlCache::new(Duration::ZERO);
        cache.put("k", 1).await;
        assert_eq!(cache.len().await, 0);
        assert!(cache.get("k").await.is_none());
    }

    #[tokio::test]
    async fn expired_entries_are_misses() {
        let cache: TtlCache<u32> = TtlCache::new(Duration::from_millis(5));
        cache.put("k", 1).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cache.get("k").await.is_none());
        cache.clear_expired().await;
        assert_eq!(cache.len().await, 0);
    }
}
