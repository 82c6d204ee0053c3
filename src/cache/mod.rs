//! Cache Module
//!
//! Key construction, TTL policy, statistics, invalidation and the manager
//! that ties them to a storage backend.

pub mod codec;
mod entry;
mod interceptor;
mod invalidation;
mod key;
mod lru;
mod manager;
pub mod pattern;
mod stats;
mod ttl;

#[cfg(test)]
mod property_tests;

// Re-export public types
pub use entry::{current_timestamp_ms, expiry_from_now, is_expired_at, CacheEntry};
pub use interceptor::{CachedRead, InvalidatingWrite};
pub use invalidation::{render_template, InvalidationEngine, InvalidationReport};
pub use key::{build_key, encode_value, operation_name, CallArgs, KeyParams, EMPTY_PARAMS};
pub use lru::LruTracker;
pub use manager::CacheManager;
pub use stats::{hit_rate, CacheStatistics, OperationStatistics, StatsRecorder};
pub use ttl::{
    parse_ttl_setting, CallPredicate, ResolveTtl, TtlPreset, TtlResolver, TtlRule, TtlSpec,
};

// == Public Constants ==
/// Parameter encodings longer than this are replaced by a digest
pub const MAX_PARAMS_LENGTH: usize = 200;

/// Writes between opportunistic sweeps of the memory backend
pub const SWEEP_EVERY_WRITES: u64 = 128;
