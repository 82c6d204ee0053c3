//! API Routes
//!
//! Configures the Axum router with the cache admin endpoints.

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    clear_handler, delete_handler, health_handler, invalidate_chain_handler, invalidate_handler,
    reload_handler, stats_handler, AppState,
};

/// Creates the admin router.
///
/// # Endpoints
/// - `GET /health` - Backend health
/// - `GET /stats` - Cache statistics
/// - `POST /invalidate` - Purge keys by pattern
/// - `POST /invalidate/chain` - Purge keys through a registered chain
/// - `DELETE /del/:key` - Delete one key
/// - `DELETE /clear` - Empty the cache and reset counters
/// - `POST /reload` - Re-read configuration
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .route("/invalidate", post(invalidate_handler))
        .route("/invalidate/chain", post(invalidate_chain_handler))
        .route("/del/:key", delete(delete_handler))
        .route("/clear", delete(clear_handler))
        .route("/reload", post(reload_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
