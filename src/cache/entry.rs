//! Cache Entry Module
//!
//! A stored value together with its storage and expiry timestamps.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::Value;

// == Cache Entry ==
/// A single cached value. Visible to readers only while `now < expires_at`.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// The stored value
    pub value: Value,
    /// Storage timestamp (Unix milliseconds)
    pub stored_at: u64,
    /// Expiration timestamp (Unix milliseconds)
    pub expires_at: u64,
}

impl CacheEntry {
    /// Creates an entry expiring `ttl_seconds` from now.
    pub fn new(value: Value, ttl_seconds: u64) -> Self {
        let now = current_timestamp_ms();
        Self {
            value,
            stored_at: now,
            expires_at: expiry_from_now(now, ttl_seconds),
        }
    }

    /// Expired once the current time reaches `expires_at`.
    pub fn is_expired(&self) -> bool {
        is_expired_at(self.expires_at, current_timestamp_ms())
    }

    /// Remaining lifetime, zero once expired.
    pub fn ttl_remaining(&self) -> Duration {
        Duration::from_millis(self.expires_at.saturating_sub(current_timestamp_ms()))
    }
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Expiry timestamp for a TTL starting at `now_ms`.
pub fn expiry_from_now(now_ms: u64, ttl_seconds: u64) -> u64 {
    now_ms.saturating_add(ttl_seconds.saturating_mul(1000))
}

/// Boundary is inclusive: an entry is gone the moment `now == expires_at`.
pub fn is_expired_at(expires_at: u64, now_ms: u64) -> bool {
    now_ms >= expires_at
}
