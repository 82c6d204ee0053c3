//! Storage Backends
//!
//! The storage contract shared by every backend, and the in-process,
//! Redis-backed and file-backed implementations.

mod file;
mod memory;
mod redis;

pub use self::file::FileBackend;
pub use self::memory::MemoryBackend;
pub use self::redis::{RedisBackend, RedisBackendConfig};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

// == Cache Backend ==
/// Storage contract for cached values.
///
/// Every method must be safe to call concurrently. Keys are opaque strings;
/// patterns carry at most one trailing `*` (see [`crate::cache::pattern`]).
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Short name reported in statistics (`memory`, `redis`, `file`).
    fn name(&self) -> &'static str;

    /// Returns the value, treating expired entries as absent.
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Stores a value, overwriting any existing entry. `ttl_seconds` is > 0.
    async fn set(&self, key: &str, value: Value, ttl_seconds: u64) -> Result<()>;

    /// Removes a key. Deleting an absent key is not an error; returns whether
    /// something was removed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Live keys matching a single-trailing-wildcard pattern.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;

    /// Removes every entry.
    async fn clear(&self) -> Result<()>;

    /// Number of live entries.
    async fn size(&self) -> Result<usize>;

    /// Cheap liveness probe.
    async fn health_check(&self) -> bool;

    /// Physically drops expired entries; returns how many were removed.
    async fn sweep_expired(&self) -> Result<usize> {
        Ok(0)
    }
}
