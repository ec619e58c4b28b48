//! Redis cache backend.
//!
//! Values are stored as plain byte strings under `"{ns}:{key}"`; TTL is
//! applied via `SET ... EX`. `list_subscribed` falls back to a `KEYS
//! ns:*` scan (§9 open question: this does not scale past a moderate
//! fleet; an auxiliary index set should replace it if that ever
//! matters, but expected cardinality here is in the thousands).

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands};
use std::time::Duration;

use super::{effective_ttl, validate_value, Cache, CacheError};

pub struct RedisCache {
    manager: ConnectionManager,
}

impl RedisCache {
    pub async fn connect(address: &str, password: &str, db: i64) -> Result<Self, CacheError> {
        let mut url = format!("redis://{address}/{db}");
        if !password.is_empty() {
            url = format!("redis://:{password}@{address}/{db}");
        }
        let client = redis::Client::open(url).map_err(|e| CacheError::Io(e.to_string()))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| CacheError::Io(e.to_string()))?;
        Ok(Self { manager })
    }

    fn composite_key(namespace: &str, key: &str) -> String {
        format!("{namespace}:{key}")
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self.manager.clone();
        let composite = Self::composite_key(namespace, key);
        conn.get::<_, Option<Vec<u8>>>(&composite)
            .await
            .map_err(|e| CacheError::Io(e.to_string()))
    }

    async fn set(
        &self,
        namespace: &str,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        validate_value(&value)?;
        let mut conn = self.manager.clone();
        let composite = Self::composite_key(namespace, key);
        let ttl_secs = effective_ttl(ttl).as_secs().max(1);
        conn.set_ex::<_, _, ()>(&composite, value, ttl_secs)
            .await
            .map_err(|e| CacheError::Io(e.to_string()))
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<(), CacheError> {
        let mut conn = self.manager.clone();
        let composite = Self::composite_key(namespace, key);
        conn.del::<_, ()>(&composite)
            .await
            .map_err(|e| CacheError::Io(e.to_string()))
    }

    async fn close(&self) -> Result<(), CacheError> {
        // ConnectionManager has no explicit close; dropping it tears down
        // the underlying connection.
        Ok(())
    }

    async fn list_subscribed(&self, namespace: &str) -> Result<Vec<String>, CacheError> {
        let mut conn = self.manager.clone();
        let pattern = format!("{namespace}:*");
        let keys: Vec<String> = conn
            .keys(&pattern)
            .await
            .map_err(|e| CacheError::Io(e.to_string()))?;

        let mut urls = Vec::with_capacity(keys.len());
        for key in keys {
            let raw: Option<Vec<u8>> = conn
                .get(&key)
                .await
                .map_err(|e| CacheError::Io(e.to_string()))?;
            let Some(raw) = raw else { continue };
            if let Ok(value) = serde_json::from_slice::<serde_json::Value>(&raw) {
                if let Some(url) = value.get("feedUrl").and_then(|v| v.as_str()) {
                    urls.push(url.to_string());
                }
            }
        }
        Ok(urls)
    }
}
