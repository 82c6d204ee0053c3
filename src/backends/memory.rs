//! Memory Backend
//!
//! In-process store combining a HashMap with LRU tracking and lazy TTL
//! expiration. The mutex is held only for map operations, never across an
//! await point.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::backends::CacheBackend;
use crate::cache::{pattern, CacheEntry, LruTracker, SWEEP_EVERY_WRITES};
use crate::error::{CacheError, Result};

// == Memory Store ==
#[derive(Debug)]
struct MemoryStore {
    entries: HashMap<String, CacheEntry>,
    lru: LruTracker,
    /// Soft cap on entries, `None` = unbounded
    max_entries: Option<usize>,
    writes_since_sweep: u64,
    evictions: u64,
}

impl MemoryStore {
    fn new(max_entries: Option<usize>) -> Self {
        Self {
            entries: HashMap::new(),
            lru: LruTracker::new(),
            max_entries,
            writes_since_sweep: 0,
            evictions: 0,
        }
    }

    fn get(&mut self, key: &str) -> Option<Value> {
        let expired = self.entries.get(key)?.is_expired();
        if expired {
            self.remove(key);
            return None;
        }
        self.lru.touch(key);
        self.entries.get(key).map(|entry| entry.value.clone())
    }

    fn set(&mut self, key: &str, value: Value, ttl_seconds: u64) {
        self.writes_since_sweep += 1;
        if self.writes_since_sweep >= SWEEP_EVERY_WRITES {
            self.cleanup_expired();
        }

        if !self.entries.contains_key(key) {
            self.make_room();
        }

        self.entries
            .insert(key.to_string(), CacheEntry::new(value, ttl_seconds));
        self.lru.touch(key);
    }

    /// Frees a slot for a new key: expired entries go first, then the least
    /// recently used ones.
    fn make_room(&mut self) {
        let Some(max) = self.max_entries else {
            return;
        };
        if self.entries.len() < max {
            return;
        }
        self.cleanup_expired();
        while self.entries.len() >= max {
            match self.lru.evict_oldest() {
                Some(evicted) => {
                    self.entries.remove(&evicted);
                    self.evictions += 1;
                    debug!(key = %evicted, "Evicted least recently used entry");
                }
                None => break,
            }
        }
    }

    fn remove(&mut self, key: &str) -> bool {
        self.lru.remove(key);
        self.entries.remove(key).is_some()
    }

    fn keys(&self, pattern: &str) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(key, entry)| !entry.is_expired() && pattern::matches(pattern, key))
            .map(|(key, _)| key.clone())
            .collect()
    }

    fn cleanup_expired(&mut self) -> usize {
        self.writes_since_sweep = 0;
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired())
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.remove(key);
        }
        expired.len()
    }

    fn live_len(&self) -> usize {
        self.entries.values().filter(|e| !e.is_expired()).count()
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.lru.clear();
        self.writes_since_sweep = 0;
    }
}

// == Memory Backend ==
/// Default in-process backend with LRU eviction once `max_entries` is reached.
#[derive(Debug)]
pub struct MemoryBackend {
    store: Mutex<MemoryStore>,
}

impl MemoryBackend {
    /// Creates a backend; a `max_entries` of 0 means unbounded.
    pub fn new(max_entries: usize) -> Self {
        let max_entries = if max_entries == 0 {
            None
        } else {
            Some(max_entries)
        };
        Self {
            store: Mutex::new(MemoryStore::new(max_entries)),
        }
    }

    /// Number of entries evicted to respect the size cap.
    pub fn evictions(&self) -> u64 {
        self.lock().map(|store| store.evictions).unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryStore>> {
        self.store
            .lock()
            .map_err(|_| CacheError::BackendUnavailable("memory store lock poisoned".to_string()))
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(0)
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.lock()?.get(key))
    }

    async fn set(&self, key: &str, value: Value, ttl_seconds: u64) -> Result<()> {
        self.lock()?.set(key, value, ttl_seconds);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.lock()?.remove(key))
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        Ok(self.lock()?.keys(pattern))
    }

    async fn clear(&self) -> Result<()> {
        self.lock()?.clear();
        Ok(())
    }

    async fn size(&self) -> Result<usize> {
        Ok(self.lock()?.live_len())
    }

    async fn health_check(&self) -> bool {
        self.lock().is_ok()
    }

    async fn sweep_expired(&self) -> Result<usize> {
        Ok(self.lock()?.cleanup_expired())
    }
}
