//! API Cache - A caching layer for remote API clients
//!
//! Wraps async operations with read-through caching and write-driven
//! invalidation over memory, Redis or file storage.

pub mod api;
pub mod backends;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod tasks;

pub use api::AppState;
pub use cache::{CacheManager, CachedRead, CallArgs, InvalidatingWrite, TtlPreset, TtlSpec};
pub use config::{CacheConfig, Config};
pub use tasks::spawn_cleanup_task;
