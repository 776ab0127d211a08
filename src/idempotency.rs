//! Idempotency cache for non-streamed requests.
//!
//! A client-supplied `Idempotency-Key` maps to the serialized response
//! body of the first request that completed under it; replays within the
//! TTL return that body verbatim without touching the provider. Keys are
//! not validated against a payload hash, so a reused key with a different
//! payload returns the first cached result.
//!
//! The backend is pluggable so a shared distributed cache can stand in;
//! the bundled in-memory backend is NOT safe across multiple gateway
//! instances.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::IdempotencyConfig;

/// Collaborator boundary for the shared cache: `get` and set-with-TTL,
/// where the set is first-writer-wins.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;

    /// Store `value` under `key` for `ttl` unless a live entry already
    /// exists. Returns whether this call won the write.
    async fn put_if_absent(&self, key: String, value: String, ttl: Duration) -> bool;
}

pub struct IdempotencyStore {
    backend: Arc<dyn CacheBackend>,
    ttl: Duration,
}

impl IdempotencyStore {
    pub fn new(config: &IdempotencyConfig) -> Self {
        Self {
            backend: Arc::new(MemoryCache::new(config.max_entries)),
            ttl: Duration::from_secs(config.ttl_secs),
        }
    }

    pub fn with_backend(backend: Arc<dyn CacheBackend>, ttl: Duration) -> Self {
        Self { backend, ttl }
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        let cached = self.backend.get(&prefixed(key)).await;
        if cached.is_some() {
            tracing::debug!(key = %key, "Idempotency cache hit");
        }
        cached
    }

    pub async fn put(&self, key: &str, body: String) {
        if !self.backend.put_if_absent(prefixed(key), body, self.ttl).await {
            tracing::debug!(key = %key, "Idempotency key already cached, keeping first writer");
        }
    }
}

fn prefixed(key: &str) -> String {
    format!("idemp:{}", key)
}

struct CacheEntry {
    value: String,
    expires_at: Instant,
}

/// Bounded in-memory TTL cache. Expired entries are pruned on writes;
/// when full, the entry closest to expiry is evicted.
pub struct MemoryCache {
    entries: DashMap<String, CacheEntry>,
    max_entries: usize,
}

impl MemoryCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries: max_entries.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn prune_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.expires_at > now);
    }

    fn evict_soonest_to_expire(&self) {
        let victim = self
            .entries
            .iter()
            .min_by_key(|entry| entry.value().expires_at)
            .map(|entry| entry.key().clone());
        if let Some(key) = victim {
            self.entries.remove(&key);
        }
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> Option<String> {
        let entry = self.entries.get(key)?;
        if entry.expires_at <= Instant::now() {
            drop(entry);
            self.entries.remove(key);
            return None;
        }
        Some(entry.value.clone())
    }

    async fn put_if_absent(&self, key: String, value: String, ttl: Duration) -> bool {
        let now = Instant::now();

        if let Some(existing) = self.entries.get(&key) {
            if existing.expires_at > now {
                return false;
            }
        }

        if self.entries.len() >= self.max_entries {
            self.prune_expired();
            while self.entries.len() >= self.max_entries {
                self.evict_soonest_to_expire();
            }
        }

        self.entries.insert(
            key,
            CacheEntry {
                value,
                expires_at: now + ttl,
            },
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(ttl_secs: u64, max_entries: usize) -> IdempotencyStore {
        IdempotencyStore::new(&IdempotencyConfig {
            ttl_secs,
            max_entries,
        })
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let store = store(60, 100);
        assert!(store.get("k1").await.is_none());

        store.put("k1", "{\"id\":\"r1\"}".to_string()).await;
        assert_eq!(store.get("k1").await.unwrap(), "{\"id\":\"r1\"}");
    }

    #[tokio::test]
    async fn test_first_writer_wins() {
        let store = store(60, 100);
        store.put("k1", "first".to_string()).await;
        store.put("k1", "second".to_string()).await;

        assert_eq!(store.get("k1").await.unwrap(), "first");
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let store = store(10, 100);
        store.put("k1", "body".to_string()).await;
        assert!(store.get("k1").await.is_some());

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(store.get("k1").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_can_be_rewritten() {
        let store = store(10, 100);
        store.put("k1", "first".to_string()).await;

        tokio::time::advance(Duration::from_secs(11)).await;
        store.put("k1", "second".to_string()).await;
        assert_eq!(store.get("k1").await.unwrap(), "second");
    }

    #[tokio::test]
    async fn test_bounded_eviction() {
        let cache = MemoryCache::new(2);
        assert!(
            cache
                .put_if_absent("a".into(), "1".into(), Duration::from_secs(10))
                .await
        );
        assert!(
            cache
                .put_if_absent("b".into(), "2".into(), Duration::from_secs(20))
                .await
        );
        assert!(
            cache
                .put_if_absent("c".into(), "3".into(), Duration::from_secs(30))
                .await
        );

        // "a" was closest to expiry and should have been evicted.
        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").await.is_none());
        assert!(cache.get("b").await.is_some());
        assert!(cache.get("c").await.is_some());
    }

    #[tokio::test]
    async fn test_keys_are_namespaced() {
        let store = store(60, 100);
        store.put("k1", "body".to_string()).await;

        // The raw backend key carries the idemp: prefix.
        let backend = MemoryCache::new(10);
        assert!(
            backend
                .put_if_absent(super::prefixed("k1"), "x".into(), Duration::from_secs(5))
                .await
        );
        assert!(backend.get("idemp:k1").await.is_some());
    }
}
