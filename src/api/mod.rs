//! API Module
//!
//! Admin HTTP surface over a shared [`crate::cache::CacheManager`].
//!
//! # Endpoints
//! - `GET /health` - Backend health
//! - `GET /stats` - Cache statistics
//! - `POST /invalidate` - Purge keys by pattern
//! - `POST /invalidate/chain` - Purge keys through a registered chain
//! - `DELETE /del/:key` - Delete one key
//! - `DELETE /clear` - Empty the cache
//! - `POST /reload` - Re-read configuration

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
