//! Cache Manager
//!
//! Owns the active backend and the statistics, and turns every backend
//! failure into "as if caching were disabled" for that call.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::backends::{CacheBackend, FileBackend, MemoryBackend, RedisBackend, RedisBackendConfig};
use crate::cache::{
    CacheStatistics, CallArgs, InvalidationEngine, InvalidationReport, StatsRecorder, TtlResolver,
    TtlSpec,
};
use crate::config::{BackendKind, CacheConfig};

// == Settings ==
#[derive(Debug, Clone)]
struct Settings {
    config: CacheConfig,
    ttl: TtlResolver,
}

impl Settings {
    fn new(config: CacheConfig) -> Self {
        Self {
            ttl: config.ttl_resolver(),
            config,
        }
    }
}

// == Cache Manager ==
/// The single owner of the active backend.
///
/// Construct one at startup and share it (usually behind an `Arc`) with every
/// wrapped operation. The backend is selected lazily on first use.
pub struct CacheManager {
    enabled: AtomicBool,
    settings: RwLock<Settings>,
    backend: RwLock<Option<Arc<dyn CacheBackend>>>,
    /// Backend supplied by the embedder; survives reloads
    injected: Option<Arc<dyn CacheBackend>>,
    invalidation: InvalidationEngine,
    stats: StatsRecorder,
}

impl fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheManager")
            .field("enabled", &self.is_enabled())
            .field("injected", &self.injected.as_ref().map(|b| b.name()))
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl CacheManager {
    /// Creates a manager that selects its backend from `config` on first use.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            enabled: AtomicBool::new(config.enabled),
            settings: RwLock::new(Settings::new(config)),
            backend: RwLock::new(None),
            injected: None,
            invalidation: InvalidationEngine::default(),
            stats: StatsRecorder::new(),
        }
    }

    /// Creates a manager bound to an existing backend. No health check is
    /// run and the backend is kept across reloads.
    pub fn with_backend(config: CacheConfig, backend: Arc<dyn CacheBackend>) -> Self {
        let mut manager = Self::new(config);
        manager.injected = Some(backend);
        manager
    }

    /// Replaces the invalidation engine (namespaces and chains).
    pub fn with_invalidation(mut self, engine: InvalidationEngine) -> Self {
        self.invalidation = engine;
        self
    }

    pub fn invalidation(&self) -> &InvalidationEngine {
        &self.invalidation
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub(crate) fn recorder(&self) -> &StatsRecorder {
        &self.stats
    }

    // == Backend Lifecycle ==
    /// Returns the active backend, selecting it on first use. The lock is
    /// released before the caller performs any backend I/O.
    async fn active_backend(&self) -> Arc<dyn CacheBackend> {
        if let Some(backend) = &self.injected {
            return backend.clone();
        }
        if let Some(backend) = self.backend.read().await.as_ref() {
            return backend.clone();
        }

        let mut slot = self.backend.write().await;
        if let Some(backend) = slot.as_ref() {
            return backend.clone();
        }
        let config = self.settings.read().await.config.clone();
        let backend = select_backend(&config).await;
        *slot = Some(backend.clone());
        backend
    }

    /// The backend if one is already active, without selecting one.
    async fn current_backend(&self) -> Option<Arc<dyn CacheBackend>> {
        match &self.injected {
            Some(backend) => Some(backend.clone()),
            None => self.backend.read().await.clone(),
        }
    }

    /// Swaps in a new configuration. The active backend is dropped so the
    /// next operation selects one from the new settings. Counters survive.
    pub async fn reload(&self, config: CacheConfig) {
        info!(
            enabled = config.enabled,
            backend = %config.backend,
            default_ttl = config.default_ttl,
            "Reloading cache configuration"
        );
        self.enabled.store(config.enabled, Ordering::Relaxed);
        *self.settings.write().await = Settings::new(config);
        *self.backend.write().await = None;
    }

    /// Drops the active backend. A later operation re-selects one.
    pub async fn shutdown(&self) {
        if self.backend.write().await.take().is_some() {
            info!("Cache backend released");
        }
    }

    // == Get ==
    /// Looks up a key. Disabled caches and backend errors report a miss.
    pub async fn get(&self, key: &str) -> Option<Value> {
        if !self.is_enabled() {
            self.stats.record_miss();
            return None;
        }

        let backend = self.active_backend().await;
        match backend.get(key).await {
            Ok(Some(value)) => {
                self.stats.record_hit();
                debug!(key, "Cache hit");
                Some(value)
            }
            Ok(None) => {
                self.stats.record_miss();
                debug!(key, "Cache miss");
                None
            }
            Err(e) => {
                self.stats.record_miss();
                warn!(key, backend = backend.name(), error = %e, "Cache read failed, treating as miss");
                None
            }
        }
    }

    // == Set ==
    /// Stores a value. No-op for `ttl_seconds == 0` or a disabled cache;
    /// backend errors are logged and swallowed.
    pub async fn set(&self, key: &str, value: Value, ttl_seconds: u64) {
        if !self.is_enabled() || ttl_seconds == 0 {
            return;
        }

        let backend = self.active_backend().await;
        match backend.set(key, value, ttl_seconds).await {
            Ok(()) => {
                self.stats.record_set();
                debug!(key, ttl_seconds, "Cached value");
            }
            Err(e) => warn!(key, backend = backend.name(), error = %e, "Cache write failed"),
        }
    }

    // == Delete ==
    /// Removes a single key; returns whether it existed.
    pub async fn delete(&self, key: &str) -> bool {
        if !self.is_enabled() {
            return false;
        }

        let backend = self.active_backend().await;
        match backend.delete(key).await {
            Ok(removed) => {
                if removed {
                    self.stats.record_delete();
                }
                removed
            }
            Err(e) => {
                warn!(key, backend = backend.name(), error = %e, "Cache delete failed");
                false
            }
        }
    }

    // == Invalidate ==
    /// Purges every key matching `patterns` after hierarchy expansion.
    pub async fn invalidate<S: AsRef<str> + Sync>(&self, patterns: &[S]) -> InvalidationReport {
        if !self.is_enabled() || patterns.is_empty() {
            return InvalidationReport::default();
        }

        let backend = self.active_backend().await;
        match self.invalidation.execute(backend.as_ref(), patterns).await {
            Ok(report) => {
                self.stats.record_invalidations(report.keys_removed as u64);
                if report.keys_removed > 0 {
                    info!(
                        removed = report.keys_removed,
                        patterns = ?report.patterns,
                        "Invalidated cache entries"
                    );
                }
                report
            }
            Err(e) => {
                warn!(backend = backend.name(), error = %e, "Cache invalidation failed");
                InvalidationReport::default()
            }
        }
    }

    /// Resolves a registered chain with `vars` and purges the result.
    pub async fn invalidate_chain(
        &self,
        chain: &str,
        vars: &HashMap<String, String>,
    ) -> InvalidationReport {
        let patterns = self.invalidation.resolve_chain(chain, vars);
        self.invalidate(&patterns).await
    }

    // == Clear ==
    /// Empties the backend and resets every counter.
    pub async fn clear(&self) {
        let backend = if self.is_enabled() {
            Some(self.active_backend().await)
        } else {
            self.current_backend().await
        };

        if let Some(backend) = backend {
            if let Err(e) = backend.clear().await {
                warn!(backend = backend.name(), error = %e, "Cache clear failed");
            }
        }
        self.stats.reset();
        info!("Cache cleared");
    }

    // == TTL ==
    /// Resolves the TTL for a finished call of `{prefix}.{operation}`.
    pub async fn resolve_ttl(
        &self,
        operation: &str,
        spec: Option<&TtlSpec>,
        args: &CallArgs,
        result: &Value,
    ) -> u64 {
        self.settings
            .read()
            .await
            .ttl
            .resolve(operation, spec, args, result)
    }

    // == Observability ==
    pub async fn get_statistics(&self) -> CacheStatistics {
        let backend = if self.is_enabled() {
            Some(self.active_backend().await)
        } else {
            self.current_backend().await
        };

        let (name, size) = match backend {
            Some(backend) => {
                let size = backend.size().await.unwrap_or_else(|e| {
                    warn!(backend = backend.name(), error = %e, "Could not read cache size");
                    0
                });
                (backend.name().to_string(), size)
            }
            None => (self.settings.read().await.config.backend.to_string(), 0),
        };

        self.stats.snapshot(self.is_enabled(), &name, size)
    }

    /// Liveness of the active backend. A disabled cache is always healthy.
    pub async fn health_check(&self) -> bool {
        if !self.is_enabled() {
            return true;
        }
        self.active_backend().await.health_check().await
    }

    /// Drops expired entries from the active backend, if one is active.
    pub async fn sweep_expired(&self) -> usize {
        let Some(backend) = self.current_backend().await else {
            return 0;
        };
        backend.sweep_expired().await.unwrap_or_else(|e| {
            warn!(backend = backend.name(), error = %e, "Expired entry sweep failed");
            0
        })
    }
}

// == Backend Selection ==
/// Builds the requested backend, falling back to memory whenever it is
/// misconfigured or fails its health check.
async fn select_backend(config: &CacheConfig) -> Arc<dyn CacheBackend> {
    let selected: Option<Arc<dyn CacheBackend>> = match config.backend {
        BackendKind::Memory => None,
        BackendKind::Redis => match &config.redis_url {
            None => {
                warn!("Redis backend requested without CACHE_REDIS_URL");
                None
            }
            Some(url) => {
                let redis_config =
                    RedisBackendConfig::new(url.clone()).with_namespace(config.redis_namespace.clone());
                match RedisBackend::connect(redis_config).await {
                    Ok(backend) if backend.health_check().await => Some(Arc::new(backend)),
                    Ok(_) => None,
                    Err(e) => {
                        warn!(error = %e, "Could not connect to Redis");
                        None
                    }
                }
            }
        },
        BackendKind::File => match &config.cache_dir {
            None => {
                warn!("File backend requested without CACHE_DIR");
                None
            }
            Some(dir) => {
                let backend = FileBackend::new(dir.clone());
                if backend.health_check().await {
                    Some(Arc::new(backend))
                } else {
                    None
                }
            }
        },
    };

    match selected {
        Some(backend) => {
            info!(backend = backend.name(), "Cache backend initialized");
            backend
        }
        None => {
            if config.backend != BackendKind::Memory {
                warn!(requested = %config.backend, "Falling back to the memory backend");
            }
            info!(max_size = config.max_size, "Memory cache backend initialized");
            Arc::new(MemoryBackend::new(config.max_size))
        }
    }
}
