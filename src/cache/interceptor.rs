//! Operation Interceptors
//!
//! Wrap an async operation with read-through caching ([`CachedRead`]) or
//! post-write invalidation ([`InvalidatingWrite`]). Both are plain values
//! built once per operation and reused for every call.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::{
    build_key, operation_name, CacheManager, CallArgs, CallPredicate, KeyParams, TtlSpec,
};

// == Cached Read ==
/// Read-through caching for a named operation.
///
/// ```ignore
/// let read = CachedRead::new("entities", "state").ttl(TtlPreset::Short);
/// let state = read.call(&cache, &args, || client.entity_state(id)).await?;
/// ```
#[derive(Clone)]
pub struct CachedRead {
    prefix: String,
    operation: String,
    ttl: Option<TtlSpec>,
    key_params: KeyParams,
    condition: Option<Arc<dyn CallPredicate>>,
}

impl fmt::Debug for CachedRead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedRead")
            .field("prefix", &self.prefix)
            .field("operation", &self.operation)
            .field("ttl", &self.ttl)
            .field("key_params", &self.key_params)
            .field("conditional", &self.condition.is_some())
            .finish()
    }
}

impl CachedRead {
    pub fn new(prefix: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            operation: operation.into(),
            ttl: None,
            key_params: KeyParams::all(),
            condition: None,
        }
    }

    /// Call-site TTL; per-operation overrides in the config still win.
    pub fn ttl(mut self, spec: impl Into<TtlSpec>) -> Self {
        self.ttl = Some(spec.into());
        self
    }

    /// Restricts which arguments take part in the key.
    pub fn key_params(mut self, params: KeyParams) -> Self {
        self.key_params = params;
        self
    }

    /// Only results for which `predicate` holds are stored.
    pub fn cache_if<P>(mut self, predicate: P) -> Self
    where
        P: CallPredicate + 'static,
    {
        self.condition = Some(Arc::new(predicate));
        self
    }

    /// `{prefix}.{operation}`, the name used for TTL overrides and stats.
    pub fn operation_name(&self) -> String {
        operation_name(&self.prefix, &self.operation)
    }

    pub fn key_for(&self, args: &CallArgs) -> String {
        build_key(&self.prefix, &self.operation, args, &self.key_params)
    }

    /// Returns the cached result for `args`, or runs `operation` and caches
    /// its success. Errors from `operation` are returned unchanged and never
    /// stored.
    pub async fn call<T, E, F, Fut>(
        &self,
        cache: &CacheManager,
        args: &CallArgs,
        operation: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let name = self.operation_name();
        let key = self.key_for(args);
        let lookup_started = Instant::now();

        if let Some(cached) = cache.get(&key).await {
            match serde_json::from_value::<T>(cached) {
                Ok(value) => {
                    cache
                        .recorder()
                        .record_operation_hit(&name, lookup_started.elapsed());
                    return Ok(value);
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Dropping cached value of unexpected shape");
                    cache.delete(&key).await;
                }
            }
        }

        let origin_started = Instant::now();
        let value = match operation().await {
            Ok(value) => value,
            Err(e) => {
                cache.recorder().record_operation_miss(&name, None);
                return Err(e);
            }
        };
        cache
            .recorder()
            .record_operation_miss(&name, Some(origin_started.elapsed()));

        if cache.is_enabled() {
            self.store(cache, &name, &key, args, &value).await;
        }
        Ok(value)
    }

    async fn store<T: Serialize>(
        &self,
        cache: &CacheManager,
        name: &str,
        key: &str,
        args: &CallArgs,
        value: &T,
    ) {
        let json = match serde_json::to_value(value) {
            Ok(json) => json,
            Err(e) => {
                warn!(key, error = %e, "Result is not cacheable");
                return;
            }
        };

        if let Some(condition) = &self.condition {
            if !condition.test(args, &json) {
                debug!(key, "Cache condition rejected result");
                return;
            }
        }

        let ttl = cache.resolve_ttl(name, self.ttl.as_ref(), args, &json).await;
        cache.set(key, json, ttl).await;
    }
}

// == Invalidating Write ==
/// Placeholder bindings for a registered chain: `(placeholder, argument)`.
#[derive(Debug, Clone)]
struct ChainBinding {
    name: String,
    bindings: Vec<(String, String)>,
}

/// Purges related cache entries after a successful write.
#[derive(Clone, Default)]
pub struct InvalidatingWrite {
    patterns: Vec<String>,
    chain: Option<ChainBinding>,
    condition: Option<Arc<dyn CallPredicate>>,
}

impl fmt::Debug for InvalidatingWrite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvalidatingWrite")
            .field("patterns", &self.patterns)
            .field("chain", &self.chain)
            .field("conditional", &self.condition.is_some())
            .finish()
    }
}

impl InvalidatingWrite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.patterns.push(pattern.into());
        self
    }

    pub fn patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.patterns.extend(patterns.into_iter().map(Into::into));
        self
    }

    /// Runs a registered chain, filling each `{placeholder}` from the named
    /// call argument.
    pub fn chain<I, P, A>(mut self, name: impl Into<String>, bindings: I) -> Self
    where
        I: IntoIterator<Item = (P, A)>,
        P: Into<String>,
        A: Into<String>,
    {
        self.chain = Some(ChainBinding {
            name: name.into(),
            bindings: bindings
                .into_iter()
                .map(|(placeholder, arg)| (placeholder.into(), arg.into()))
                .collect(),
        });
        self
    }

    /// Invalidation happens only when `predicate` holds for the result.
    pub fn invalidate_if<P>(mut self, predicate: P) -> Self
    where
        P: CallPredicate + 'static,
    {
        self.condition = Some(Arc::new(predicate));
        self
    }

    /// Patterns this write purges for `args`, before hierarchy expansion.
    pub fn patterns_for(&self, cache: &CacheManager, args: &CallArgs) -> Vec<String> {
        let mut patterns = self.patterns.clone();

        if let Some(chain) = &self.chain {
            let vars: HashMap<String, String> = chain
                .bindings
                .iter()
                .filter_map(|(placeholder, arg)| {
                    args.get_encoded(arg)
                        .map(|value| (placeholder.clone(), value))
                })
                .collect();
            patterns.extend(cache.invalidation().resolve_chain(&chain.name, &vars));
        }

        patterns
    }

    /// Runs `operation`, then invalidates. A failed write invalidates
    /// nothing and its error is returned unchanged.
    pub async fn call<T, E, F, Fut>(
        &self,
        cache: &CacheManager,
        args: &CallArgs,
        operation: F,
    ) -> Result<T, E>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let value = operation().await?;

        if let Some(condition) = &self.condition {
            let json = serde_json::to_value(&value).unwrap_or(Value::Null);
            if !condition.test(args, &json) {
                debug!("Invalidation condition not met");
                return Ok(value);
            }
        }

        let patterns = self.patterns_for(cache, args);
        if !patterns.is_empty() {
            cache.invalidate(&patterns).await;
        }
        Ok(value)
    }
}
