//! Configuration Module
//!
//! Loads cache and server settings from environment variables. Invalid values
//! never abort startup: they are logged and replaced by the default.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use tracing::warn;

use crate::cache::{parse_ttl_setting, TtlResolver};
use crate::error::CacheError;

// == Backend Kind ==
/// Which storage implementation the manager should try first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    #[default]
    Memory,
    Redis,
    File,
}

impl FromStr for BackendKind {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(BackendKind::Memory),
            "redis" => Ok(BackendKind::Redis),
            "file" => Ok(BackendKind::File),
            other => Err(CacheError::Configuration(format!(
                "Unknown cache backend '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendKind::Memory => "memory",
            BackendKind::Redis => "redis",
            BackendKind::File => "file",
        };
        f.write_str(name)
    }
}

// == Cache Config ==
/// Settings owned by the cache manager; swappable at runtime via reload.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Global on/off switch
    pub enabled: bool,
    /// Requested backend
    pub backend: BackendKind,
    /// TTL in seconds when the call site supplies none
    pub default_ttl: u64,
    /// Soft cap on memory backend entries, 0 = unbounded
    pub max_size: usize,
    /// Required when `backend` is `Redis`
    pub redis_url: Option<String>,
    /// Prefix applied to every Redis key
    pub redis_namespace: String,
    /// Required when `backend` is `File`
    pub cache_dir: Option<PathBuf>,
    /// `{prefix}.{operation}` -> TTL seconds, wins over call-site specs
    pub ttl_overrides: HashMap<String, u64>,
}

impl CacheConfig {
    pub fn ttl_resolver(&self) -> TtlResolver {
        TtlResolver::new(self.default_ttl, self.ttl_overrides.clone())
    }

    /// Builder-style toggle, mostly for tests and embedders.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_ttl_override(mut self, operation: impl Into<String>, seconds: u64) -> Self {
        self.ttl_overrides.insert(operation.into(), seconds);
        self
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: BackendKind::Memory,
            default_ttl: 300,
            max_size: 1000,
            redis_url: None,
            redis_namespace: "api_cache:".to_string(),
            cache_dir: None,
            ttl_overrides: HashMap::new(),
        }
    }
}

// == Config ==
/// Process configuration: cache settings plus the admin server.
#[derive(Debug, Clone)]
pub struct Config {
    pub cache: CacheConfig,
    /// Admin HTTP server port
    pub server_port: u16,
    /// Background sweep interval in seconds, 0 disables it
    pub cleanup_interval: u64,
}

impl Config {
    /// Loads configuration from the process environment.
    ///
    /// # Environment Variables
    /// - `CACHE_ENABLED` - Global switch (default: true)
    /// - `CACHE_BACKEND` - `memory`, `redis` or `file` (default: memory)
    /// - `CACHE_DEFAULT_TTL` - Seconds or preset name (default: 300)
    /// - `CACHE_MAX_SIZE` - Memory backend entry cap (default: 1000)
    /// - `CACHE_REDIS_URL` - Redis connection string
    /// - `CACHE_REDIS_NAMESPACE` - Redis key prefix (default: `api_cache:`)
    /// - `CACHE_DIR` - File backend directory
    /// - `CACHE_TTL_OVERRIDES` - e.g. `entities.state=30,entities.list=long`
    /// - `SERVER_PORT` - Admin HTTP port (default: 3000)
    /// - `CLEANUP_INTERVAL` - Sweep frequency in seconds (default: 60)
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Loads configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let value = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let cache = CacheConfig {
            enabled: value("CACHE_ENABLED")
                .map(|raw| parse_bool("CACHE_ENABLED", &raw, defaults.cache.enabled))
                .unwrap_or(defaults.cache.enabled),
            backend: value("CACHE_BACKEND")
                .map(|raw| {
                    raw.parse().unwrap_or_else(|e| {
                        warn!(error = %e, "Falling back to the memory backend");
                        BackendKind::Memory
                    })
                })
                .unwrap_or(defaults.cache.backend),
            default_ttl: value("CACHE_DEFAULT_TTL")
                .map(|raw| {
                    parse_ttl_setting(&raw).unwrap_or_else(|e| {
                        warn!(error = %e, "Invalid CACHE_DEFAULT_TTL, using default");
                        defaults.cache.default_ttl
                    })
                })
                .unwrap_or(defaults.cache.default_ttl),
            max_size: parse_or(value("CACHE_MAX_SIZE"), "CACHE_MAX_SIZE", defaults.cache.max_size),
            redis_url: value("CACHE_REDIS_URL"),
            redis_namespace: value("CACHE_REDIS_NAMESPACE")
                .unwrap_or_else(|| defaults.cache.redis_namespace.clone()),
            cache_dir: value("CACHE_DIR").map(PathBuf::from),
            ttl_overrides: value("CACHE_TTL_OVERRIDES")
                .map(|raw| parse_ttl_overrides(&raw))
                .unwrap_or_default(),
        };

        Self {
            cache,
            server_port: parse_or(value("SERVER_PORT"), "SERVER_PORT", defaults.server_port),
            cleanup_interval: parse_or(
                value("CLEANUP_INTERVAL"),
                "CLEANUP_INTERVAL",
                defaults.cleanup_interval,
            ),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            server_port: 3000,
            cleanup_interval: 60,
        }
    }
}

// == Parsing Helpers ==
fn parse_or<T: FromStr>(raw: Option<String>, name: &str, default: T) -> T {
    match raw {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(variable = name, value = %raw, "Invalid setting, using default");
            default
        }),
        None => default,
    }
}

fn parse_bool(name: &str, raw: &str, default: bool) -> bool {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => {
            warn!(variable = name, value = %raw, "Invalid boolean, using default");
            default
        }
    }
}

/// Parses `prefix.operation=ttl` pairs separated by commas. Bad pairs are
/// skipped with a warning.
pub fn parse_ttl_overrides(raw: &str) -> HashMap<String, u64> {
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let Some((operation, ttl)) = pair.split_once('=') else {
                warn!(entry = %pair, "Ignoring TTL override without '='");
                return None;
            };
            match parse_ttl_setting(ttl) {
                Ok(seconds) => Some((operation.trim().to_string(), seconds)),
                Err(e) => {
                    warn!(entry = %pair, error = %e, "Ignoring invalid TTL override");
                    None
                }
            }
        })
        .collect()
}
