//! Last-known-good store for prediction responses.
//!
//! Entries never expire: a successful upstream fetch overwrites the entry for its key
//! and a failed fetch only ever reads it.

use crate::error::ProxyError;
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands};
use std::collections::HashMap;
use std::fmt;
use tokio::sync::RwLock;
use tracing::info;

/// Key under which a stop's (or a stop+route's) last response is stored.
///
/// The stop+route form is a plain concatenation with no delimiter, which keeps the
/// keys compatible with entries already written by the previous deployment. It is not
/// reversible and can collide: stop "1" + route "23" and stop "12" + route "3" share
/// the key "123".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn stop(stop: &str) -> Self {
        CacheKey(stop.to_string())
    }

    pub fn stop_and_route(stop: &str, route: &str) -> Self {
        CacheKey(format!("{stop}{route}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn exists(&self, key: &CacheKey) -> Result<bool, ProxyError>;

    /// Raw stored text; decoding is left to the caller.
    async fn get(&self, key: &CacheKey) -> Result<Option<String>, ProxyError>;

    async fn set(&self, key: &CacheKey, value: String) -> Result<(), ProxyError>;
}

/// Redis-backed store. `ConnectionManager` reconnects on its own after an outage.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
    redis_url: String,
}

impl fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCache")
            .field("redis_url", &self.redis_url)
            .finish_non_exhaustive()
    }
}

impl RedisCache {
    pub async fn connect(redis_url: &str) -> Result<Self, ProxyError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| ProxyError::CacheUnavailable(format!("invalid redis url {redis_url}: {e}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| ProxyError::CacheUnavailable(format!("failed to connect to {redis_url}: {e}")))?;
        info!("Connected to redis at {}", redis_url);
        Ok(Self { conn, redis_url: redis_url.to_string() })
    }
}

fn redis_error(op: &str, key: &CacheKey, e: redis::RedisError) -> ProxyError {
    ProxyError::CacheUnavailable(format!("redis {op} failed for key {key}: {e}"))
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn exists(&self, key: &CacheKey) -> Result<bool, ProxyError> {
        let mut conn = self.conn.clone();
        conn.exists::<_, bool>(key.as_str())
            .await
            .map_err(|e| redis_error("EXISTS", key, e))
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<String>, ProxyError> {
        let mut conn = self.conn.clone();
        conn.get::<_, Option<String>>(key.as_str())
            .await
            .map_err(|e| redis_error("GET", key, e))
    }

    async fn set(&self, key: &CacheKey, value: String) -> Result<(), ProxyError> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(key.as_str(), value)
            .await
            .map_err(|e| redis_error("SET", key, e))
    }
}

/// In-process store, for tests and for running without redis.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn exists(&self, key: &CacheKey) -> Result<bool, ProxyError> {
        Ok(self.entries.read().await.contains_key(key.as_str()))
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<String>, ProxyError> {
        Ok(self.entries.read().await.get(key.as_str()).cloned())
    }

    async fn set(&self, key: &CacheKey, value: String) -> Result<(), ProxyError> {
        self.entries.write().await.insert(key.as_str().to_string(), value);
        Ok(())
    }
}
