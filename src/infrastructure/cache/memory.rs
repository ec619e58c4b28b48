//! In-memory cache backend: a concurrent map keyed by `"{ns}:{key}"`.
//!
//! Grounded in the `DashMap`-backed cache used by the `rapina` example
//! (response cache with TTL-based expiry): entries carry their own
//! expiry, reads check it before returning, and a background sweep
//! opportunistically drops expired entries so the map doesn't grow
//! unbounded between reads.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;

use super::{effective_ttl, validate_value, Cache, CacheError};

const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

struct Entry {
    value: Vec<u8>,
    expires_at: SystemTime,
}

impl Entry {
    fn is_expired(&self, now: SystemTime) -> bool {
        now >= self.expires_at
    }
}

pub struct MemoryCache {
    entries: Arc<DashMap<String, Entry>>,
    sweeper: Option<JoinHandle<()>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::with_sweep_interval(DEFAULT_SWEEP_INTERVAL)
    }

    /// `sweep_interval` is how often expired entries are opportunistically
    /// dropped between reads; configured via `MEMORY_CACHE_EXPIRATION`.
    pub fn with_sweep_interval(sweep_interval: Duration) -> Self {
        let entries: Arc<DashMap<String, Entry>> = Arc::new(DashMap::new());
        let sweep_entries = entries.clone();
        let sweeper = tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweep_interval.max(Duration::from_secs(1)));
            loop {
                interval.tick().await;
                let now = SystemTime::now();
                sweep_entries.retain(|_, entry| !entry.is_expired(now));
                tracing::debug!(
                    remaining = sweep_entries.len(),
                    "in-memory cache sweep complete"
                );
            }
        });

        Self {
            entries,
            sweeper: Some(sweeper),
        }
    }

    fn composite_key(namespace: &str, key: &str) -> String {
        format!("{namespace}:{key}")
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MemoryCache {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let composite = Self::composite_key(namespace, key);
        let now = SystemTime::now();

        // Check expiry on read so a race with the sweeper can never
        // surface stale content to a caller (§9 open question).
        let hit = match self.entries.get(&composite) {
            Some(entry) if !entry.is_expired(now) => Some(entry.value.clone()),
            Some(_) => None,
            None => None,
        };

        if hit.is_none() {
            // Opportunistically evict if it was present but expired.
            self.entries.remove_if(&composite, |_, entry| entry.is_expired(now));
        }

        Ok(hit)
    }

    async fn set(
        &self,
        namespace: &str,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        validate_value(&value)?;
        let composite = Self::composite_key(namespace, key);
        let expires_at = SystemTime::now() + effective_ttl(ttl);
        self.entries.insert(composite, Entry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<(), CacheError> {
        self.entries.remove(&Self::composite_key(namespace, key));
        Ok(())
    }

    async fn close(&self) -> Result<(), CacheError> {
        Ok(())
    }

    async fn list_subscribed(&self, namespace: &str) -> Result<Vec<String>, CacheError> {
        let prefix = format!("{namespace}:");
        let now = SystemTime::now();
        let mut urls = Vec::new();
        for item in self.entries.iter() {
            if !item.key().starts_with(&prefix) || item.value().is_expired(now) {
                continue;
            }
            if let Ok(value) = serde_json::from_slice::<serde_json::Value>(&item.value().value) {
                if let Some(url) = value.get("feedUrl").and_then(|v| v.as_str()) {
                    urls.push(url.to_string());
                }
            }
        }
        Ok(urls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::cache::ns;

    #[tokio::test]
    async fn set_then_get_roundtrips_within_ttl() {
        let cache = MemoryCache::new();
        cache
            .set(ns::FEED, "k1", b"hello".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();
        let got = cache.get(ns::FEED, "k1").await.unwrap();
        assert_eq!(got, Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn get_returns_none_after_ttl_expires() {
        let cache = MemoryCache::new();
        cache
            .set(ns::FEED, "k1", b"hello".to_vec(), Duration::from_millis(1))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let got = cache.get(ns::FEED, "k1").await.unwrap();
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn namespaces_do_not_collide() {
        let cache = MemoryCache::new();
        cache
            .set(ns::FEED, "k1", b"feed-value".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();
        let got = cache.get(ns::METADATA, "k1").await.unwrap();
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn list_subscribed_extracts_feed_url_field() {
        let cache = MemoryCache::new();
        cache
            .set(
                ns::FEED,
                "a",
                br#"{"feedUrl":"https://example.com/rss"}"#.to_vec(),
                Duration::from_secs(60),
            )
            .await
            .unwrap();
        let urls = cache.list_subscribed(ns::FEED).await.unwrap();
        assert_eq!(urls, vec!["https://example.com/rss".to_string()]);
    }
}
