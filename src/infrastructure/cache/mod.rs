//! Cache abstraction (C1): a namespaced key/value store with TTL, backed
//! by one of three interchangeable implementations.
//!
//! Namespaces are a convention enforced by this module, not by the
//! backends: every physical key is `"{namespace}:{key}"`, so
//! `get_json("feed:", k)` can never see a value written under
//! `"metadata:"`.

pub mod memory;
pub mod redis;
pub mod sqlite;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::domain::models::FeedItem;

/// A decade, substituted for backends that can't express "persist
/// indefinitely" via a TTL of zero.
pub const PERSIST_TTL: Duration = Duration::from_secs(10 * 365 * 24 * 3600);

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache backend io error: {0}")]
    Io(String),
    #[error("key validation failed: {0}")]
    InvalidKey(String),
    #[error("value too large: {0} bytes (max {1})")]
    ValueTooLarge(usize, usize),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Namespace prefixes used throughout the pipeline (§3).
pub mod ns {
    pub const FEED: &str = "feed";
    pub const METADATA: &str = "metadata";
    pub const THUMBNAIL_COLOR: &str = "thumbnailColor";
}

/// Resolves a TTL of zero to [`PERSIST_TTL`]. Backends call this at the
/// point they actually set an expiry so `Cache::set(ns, k, v, Duration::ZERO)`
/// means "persist indefinitely" uniformly across implementations.
pub fn effective_ttl(ttl: Duration) -> Duration {
    if ttl.is_zero() {
        PERSIST_TTL
    } else {
        ttl
    }
}

/// Core cache contract. Not-found and expired are indistinguishable to
/// callers: both surface as `Ok(None)`.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    async fn set(
        &self,
        namespace: &str,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<(), CacheError>;

    async fn delete(&self, namespace: &str, key: &str) -> Result<(), CacheError>;

    async fn close(&self) -> Result<(), CacheError>;

    /// Returns the `feedUrl` field of every entry in `namespace`. Used to
    /// rediscover tracked feeds after a restart. Expected cardinality is
    /// at most a few thousand; not a performance-critical path.
    async fn list_subscribed(&self, namespace: &str) -> Result<Vec<String>, CacheError>;
}

/// Key validation shared by backends that need it (SQLite in particular;
/// §4.1's "Key input validation"). In-memory and Redis don't need the
/// length/null-byte checks to stay safe, but applying them uniformly
/// keeps behavior consistent across backends.
pub fn validate_key(key: &str) -> Result<(), CacheError> {
    if key.is_empty() {
        return Err(CacheError::InvalidKey("key must not be empty".into()));
    }
    if key.len() > 255 {
        return Err(CacheError::InvalidKey(format!(
            "key length {} exceeds 255",
            key.len()
        )));
    }
    if key.contains('\0') {
        return Err(CacheError::InvalidKey("key contains a null byte".into()));
    }
    // `'`, `"`, `;`, `--`, `/*`, `*/`, CR/LF/TAB are allowed (parameterized
    // queries make them safe) but worth a warning to spot abuse patterns.
    const SUSPICIOUS: &[&str] = &["'", "\"", ";", "--", "/*", "*/", "\r", "\n", "\t"];
    if SUSPICIOUS.iter().any(|s| key.contains(s)) {
        tracing::warn!(key, "cache key contains suspicious characters");
    }
    Ok(())
}

pub const MAX_VALUE_BYTES: usize = 1024 * 1024;

pub fn validate_value(value: &[u8]) -> Result<(), CacheError> {
    if value.len() > MAX_VALUE_BYTES {
        return Err(CacheError::ValueTooLarge(value.len(), MAX_VALUE_BYTES));
    }
    Ok(())
}

/// JSON and feed-merge helpers layered on top of [`Cache`]. Blanket-implemented
/// for every `Cache`, including `dyn Cache` trait objects, so callers never
/// need to know which backend they're talking to.
#[async_trait]
pub trait CacheExt: Cache {
    async fn get_json<T: DeserializeOwned>(
        &self,
        namespace: &str,
        key: &str,
    ) -> Result<Option<T>, CacheError> {
        match self.get(namespace, key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn set_json<T: Serialize + Sync>(
        &self,
        namespace: &str,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let bytes = serde_json::to_vec(value)?;
        self.set(namespace, key, bytes, ttl).await
    }

    /// Read-modify-write dedup-by-id merge of a cached item list. Callers
    /// must treat this as a critical section per key; backends serialize
    /// on the key via their own atomicity (last-writer-wins on the
    /// read-merge-write round trip is acceptable per §4.1).
    async fn merge_feed_items(
        &self,
        namespace: &str,
        key: &str,
        new_items: Vec<FeedItem>,
        ttl: Duration,
    ) -> Result<Vec<FeedItem>, CacheError> {
        let existing: Vec<FeedItem> = self
            .get_json(namespace, key)
            .await?
            .unwrap_or_default();
        let merged = crate::domain::merger::merge(existing, new_items);
        self.set_json(namespace, key, &merged, ttl).await?;
        Ok(merged)
    }
}

impl<C: Cache + ?Sized> CacheExt for C {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_key_rejects_empty_and_long() {
        assert!(validate_key("").is_err());
        assert!(validate_key(&"a".repeat(256)).is_err());
        assert!(validate_key(&"a".repeat(255)).is_ok());
    }

    #[test]
    fn validate_key_rejects_null_bytes() {
        assert!(validate_key("abc\0def").is_err());
    }

    #[test]
    fn validate_key_allows_sql_metacharacters() {
        assert!(validate_key("it's; a test -- /* comment */").is_ok());
    }

    #[test]
    fn effective_ttl_substitutes_decade_for_zero() {
        assert_eq!(effective_ttl(Duration::ZERO), PERSIST_TTL);
        assert_eq!(effective_ttl(Duration::from_secs(60)), Duration::from_secs(60));
    }
}
