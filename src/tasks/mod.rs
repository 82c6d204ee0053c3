//! Background Tasks Module
//!
//! Tasks that run periodically alongside the cache.
//!
//! # Tasks
//! - Expired entry sweep: reclaims space held by expired entries

mod cleanup;

pub use cleanup::spawn_cleanup_task;
