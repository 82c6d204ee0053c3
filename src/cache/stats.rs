//! Cache Statistics Module
//!
//! Lock-free global counters plus a per-operation breakdown used for the
//! hit-rate and time-saved estimates.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

/// hits / (hits + misses), or 0.0 if no lookups have been made.
pub fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

// == Operation Counters ==
#[derive(Debug, Clone, Default)]
struct OperationCounters {
    hits: u64,
    misses: u64,
    hit_time: Duration,
    origin_calls: u64,
    origin_time: Duration,
}

impl OperationCounters {
    fn avg_hit(&self) -> Duration {
        average(self.hit_time, self.hits)
    }

    fn avg_origin(&self) -> Duration {
        average(self.origin_time, self.origin_calls)
    }

    fn time_saved(&self) -> Duration {
        self.avg_origin()
            .saturating_sub(self.avg_hit())
            .saturating_mul(self.hits.min(u32::MAX as u64) as u32)
    }
}

fn average(total: Duration, count: u64) -> Duration {
    if count == 0 {
        Duration::ZERO
    } else {
        total / count.min(u32::MAX as u64) as u32
    }
}

// == Stats Recorder ==
/// Counters shared by every caller of the manager.
///
/// Updates are relaxed atomics, so concurrent readers see eventually
/// consistent values.
#[derive(Debug, Default)]
pub struct StatsRecorder {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    invalidations: AtomicU64,
    operations: Mutex<HashMap<String, OperationCounters>>,
}

impl StatsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalidations(&self, count: u64) {
        self.invalidations.fetch_add(count, Ordering::Relaxed);
    }

    /// Records a cache hit for `{prefix}.{operation}` and how long it took.
    pub fn record_operation_hit(&self, operation: &str, elapsed: Duration) {
        self.with_operation(operation, |counters| {
            counters.hits += 1;
            counters.hit_time += elapsed;
        });
    }

    /// Records a miss for `{prefix}.{operation}`; `origin` is the wrapped
    /// call's latency when it completed.
    pub fn record_operation_miss(&self, operation: &str, origin: Option<Duration>) {
        self.with_operation(operation, |counters| {
            counters.misses += 1;
            if let Some(origin) = origin {
                counters.origin_calls += 1;
                counters.origin_time += origin;
            }
        });
    }

    fn with_operation(&self, operation: &str, update: impl FnOnce(&mut OperationCounters)) {
        let mut operations = self.operations.lock().unwrap_or_else(|e| e.into_inner());
        update(operations.entry(operation.to_string()).or_default());
    }

    /// Zeroes every counter.
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.sets.store(0, Ordering::Relaxed);
        self.deletes.store(0, Ordering::Relaxed);
        self.invalidations.store(0, Ordering::Relaxed);
        self.operations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Builds a snapshot; backend facts are filled in by the caller.
    pub fn snapshot(&self, enabled: bool, backend: &str, size: usize) -> CacheStatistics {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);

        let operations = self.operations.lock().unwrap_or_else(|e| e.into_inner());
        let time_saved: Duration = operations.values().map(OperationCounters::time_saved).sum();
        let breakdown = operations
            .iter()
            .map(|(name, counters)| {
                (
                    name.clone(),
                    OperationStatistics {
                        hits: counters.hits,
                        misses: counters.misses,
                        hit_rate: hit_rate(counters.hits, counters.misses),
                        avg_hit_ms: counters.avg_hit().as_secs_f64() * 1000.0,
                        avg_origin_ms: counters.avg_origin().as_secs_f64() * 1000.0,
                    },
                )
            })
            .collect();

        CacheStatistics {
            enabled,
            backend: backend.to_string(),
            hits,
            misses,
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            hit_rate: hit_rate(hits, misses),
            size,
            time_saved_ms: time_saved.as_secs_f64() * 1000.0,
            operations: breakdown,
        }
    }
}

// == Snapshots ==
/// Statistics for one `{prefix}.{operation}`.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct OperationStatistics {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub avg_hit_ms: f64,
    pub avg_origin_ms: f64,
}

/// Point-in-time view of the cache counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStatistics {
    pub enabled: bool,
    pub backend: String,
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub invalidations: u64,
    pub hit_rate: f64,
    /// Live entries in the active backend
    pub size: usize,
    /// Estimated origin latency avoided by cache hits
    pub time_saved_ms: f64,
    pub operations: BTreeMap<String, OperationStatistics>,
}
