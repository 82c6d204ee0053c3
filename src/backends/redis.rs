//! Redis Backend
//!
//! Network-backed storage over a managed, auto-reconnecting multiplexed
//! connection. Expiry is delegated to Redis (`SETEX`); pattern lookups use
//! incremental `SCAN`, never `KEYS`.

use std::fmt;
use std::time::Duration;

use ::redis::aio::ConnectionManager;
use ::redis::{AsyncCommands, Client};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::backends::CacheBackend;
use crate::cache::{codec, pattern};
use crate::error::{CacheError, Result};

/// Keys deleted per `DEL` when clearing.
const DELETE_BATCH: usize = 500;

// == Config ==
#[derive(Debug, Clone)]
pub struct RedisBackendConfig {
    /// Connection string, e.g. `redis://localhost:6379/0`
    pub url: String,
    /// Prepended to every key so the cache can share a database
    pub namespace: String,
    pub connect_timeout: Duration,
    pub operation_timeout: Duration,
    /// `COUNT` hint for each `SCAN` round trip
    pub scan_count: usize,
}

impl RedisBackendConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }
}

impl Default for RedisBackendConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            namespace: "api_cache:".to_string(),
            connect_timeout: Duration::from_secs(5),
            operation_timeout: Duration::from_secs(2),
            scan_count: 200,
        }
    }
}

// == Redis Backend ==
pub struct RedisBackend {
    conn: ConnectionManager,
    config: RedisBackendConfig,
}

impl fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisBackend")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RedisBackend {
    /// Opens the connection. Fails if the URL is invalid or the server is
    /// unreachable within `connect_timeout`.
    pub async fn connect(config: RedisBackendConfig) -> Result<Self> {
        let client = Client::open(config.url.as_str())
            .map_err(|e| CacheError::Configuration(format!("Invalid Redis URL: {}", e)))?;

        let conn = tokio::time::timeout(config.connect_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| {
                CacheError::BackendUnavailable(format!(
                    "Timed out connecting to Redis after {:?}",
                    config.connect_timeout
                ))
            })??;

        debug!(namespace = %config.namespace, "Connected to Redis");
        Ok(Self { conn, config })
    }

    fn namespaced(&self, key: &str) -> String {
        namespaced_key(&self.config.namespace, key)
    }

    async fn timed<T, F>(&self, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = ::redis::RedisResult<T>>,
    {
        tokio::time::timeout(self.config.operation_timeout, fut)
            .await
            .map_err(|_| {
                CacheError::BackendUnavailable(format!(
                    "Redis operation exceeded {:?}",
                    self.config.operation_timeout
                ))
            })?
            .map_err(CacheError::from)
    }

    /// Walks the keyspace with a cursor and returns un-namespaced keys
    /// matching `pattern`.
    async fn scan(&self, pattern: &str) -> Result<Vec<String>> {
        let glob = scan_glob(&self.config.namespace, pattern);
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut found = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = self
                .timed(
                    ::redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(&glob)
                        .arg("COUNT")
                        .arg(self.config.scan_count)
                        .query_async(&mut conn),
                )
                .await?;

            found.extend(
                batch
                    .iter()
                    .filter_map(|k| k.strip_prefix(self.config.namespace.as_str()))
                    .filter(|k| pattern::matches(pattern, k))
                    .map(str::to_string),
            );

            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        // SCAN may return a key more than once
        found.sort();
        found.dedup();
        Ok(found)
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let mut conn = self.conn.clone();
        let raw: Option<Vec<u8>> = self.timed(conn.get(self.namespaced(key))).await?;
        raw.map(|bytes| codec::decode(&bytes)).transpose()
    }

    async fn set(&self, key: &str, value: Value, ttl_seconds: u64) -> Result<()> {
        let bytes = codec::encode(&value)?;
        let mut conn = self.conn.clone();
        let _: () = self
            .timed(conn.set_ex(self.namespaced(key), bytes, ttl_seconds))
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = self.timed(conn.del(self.namespaced(key))).await?;
        Ok(removed > 0)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        self.scan(pattern).await
    }

    async fn clear(&self) -> Result<()> {
        let keys = self.scan("*").await?;
        let mut conn = self.conn.clone();
        for chunk in keys.chunks(DELETE_BATCH) {
            let namespaced: Vec<String> = chunk.iter().map(|k| self.namespaced(k)).collect();
            let _: i64 = self.timed(conn.del(namespaced)).await?;
        }
        Ok(())
    }

    async fn size(&self) -> Result<usize> {
        Ok(self.scan("*").await?.len())
    }

    async fn health_check(&self) -> bool {
        let mut conn = self.conn.clone();
        let pong: Result<String> = self.timed(::redis::cmd("PING").query_async(&mut conn)).await;
        match pong {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "Redis health check failed");
                false
            }
        }
    }
}

// == Helpers ==
fn namespaced_key(namespace: &str, key: &str) -> String {
    format!("{}{}", namespace, key)
}

/// `MATCH` glob for a pattern under the namespace; only the pattern's
/// trailing wildcard stays special.
fn scan_glob(namespace: &str, key_pattern: &str) -> String {
    format!(
        "{}{}",
        pattern::to_redis_glob(namespace),
        pattern::to_redis_glob(key_pattern)
    )
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_namespaced_key() {
        assert_eq!(
            namespaced_key("api_cache:", "entities:list:all"),
            "api_cache:entities:list:all"
        );
    }

    #[test]
    fn test_scan_glob() {
        assert_eq!(scan_glob("api_cache:", "entities:*"), "api_cache:entities:*");
        assert_eq!(scan_glob("ns[1]:", "*"), "ns\\[1\\]:*");
        assert_eq!(
            scan_glob("api_cache:", "entities:list:all"),
            "api_cache:entities:list:all"
        );
    }

    #[test]
    fn test_config_defaults() {
        let config = RedisBackendConfig::new("redis://cache:6380").with_namespace("test:");
        assert_eq!(config.url, "redis://cache:6380");
        assert_eq!(config.namespace, "test:");
        assert_eq!(config.scan_count, 200);
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_url() {
        let result = RedisBackend::connect(RedisBackendConfig::new("not a url")).await;
        assert!(result.is_err());
    }

    fn live_config() -> RedisBackendConfig {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());
        RedisBackendConfig::new(url).with_namespace("api_cache_test:")
    }

    #[tokio::test]
    #[ignore = "requires a running Redis server (REDIS_URL)"]
    async fn test_live_roundtrip_and_scan() {
        let backend = RedisBackend::connect(live_config()).await.unwrap();
        assert!(backend.health_check().await);
        backend.clear().await.unwrap();

        backend
            .set("entities:state:id=a", json!({"state": "on"}), 60)
            .await
            .unwrap();
        backend.set("entities:list:all", json!([1, 2]), 60).await.unwrap();
        backend.set("automations:list:all", json!("x"), 60).await.unwrap();

        assert_eq!(
            backend.get("entities:state:id=a").await.unwrap(),
            Some(json!({"state": "on"}))
        );
        assert_eq!(backend.keys("entities:*").await.unwrap().len(), 2);
        assert_eq!(backend.size().await.unwrap(), 3);

        assert!(backend.delete("entities:list:all").await.unwrap());
        assert!(!backend.delete("entities:list:all").await.unwrap());

        backend.clear().await.unwrap();
        assert_eq!(backend.size().await.unwrap(), 0);
    }

    #[tokio::test]
    #[ignore = "requires a running Redis server (REDIS_URL)"]
    async fn test_live_expiry() {
        let backend = RedisBackend::connect(live_config()).await.unwrap();
        backend.set("short", json!(1), 1).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(backend.get("short").await.unwrap(), None);
    }
}
