//! API Handlers
//!
//! HTTP request handlers for each admin endpoint.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};

use crate::cache::{CacheManager, CacheStatistics};
use crate::config::{CacheConfig, Config};
use crate::error::{CacheError, Result};
use crate::models::{
    ChainInvalidateRequest, DeleteResponse, HealthResponse, InvalidateRequest, InvalidateResponse,
    MessageResponse,
};

/// Produces the settings applied by `POST /reload`.
pub type ConfigSource = Arc<dyn Fn() -> CacheConfig + Send + Sync>;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<CacheManager>,
    /// Where `POST /reload` reads fresh settings from
    pub config_source: ConfigSource,
}

impl AppState {
    /// State whose reloads re-read the process environment.
    pub fn new(manager: Arc<CacheManager>) -> Self {
        Self {
            manager,
            config_source: Arc::new(|| Config::from_env().cache),
        }
    }

    pub fn with_config_source<F>(mut self, source: F) -> Self
    where
        F: Fn() -> CacheConfig + Send + Sync + 'static,
    {
        self.config_source = Arc::new(source);
        self
    }
}

/// Handler for GET /health
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let healthy = state.manager.health_check().await;
    Json(HealthResponse::new(state.manager.is_enabled(), healthy))
}

/// Handler for GET /stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<CacheStatistics> {
    Json(state.manager.get_statistics().await)
}

/// Handler for POST /invalidate
pub async fn invalidate_handler(
    State(state): State<AppState>,
    Json(req): Json<InvalidateRequest>,
) -> Result<Json<InvalidateResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    let report = state.manager.invalidate(&req.patterns).await;
    Ok(Json(report.into()))
}

/// Handler for POST /invalidate/chain
pub async fn invalidate_chain_handler(
    State(state): State<AppState>,
    Json(req): Json<ChainInvalidateRequest>,
) -> Result<Json<InvalidateResponse>> {
    if state.manager.invalidation().chain(&req.chain).is_none() {
        return Err(CacheError::NotFound(format!(
            "Unknown invalidation chain '{}'",
            req.chain
        )));
    }

    let report = state.manager.invalidate_chain(&req.chain, &req.vars).await;
    Ok(Json(report.into()))
}

/// Handler for DELETE /del/:key
pub async fn delete_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<DeleteResponse>> {
    if !state.manager.delete(&key).await {
        return Err(CacheError::NotFound(format!("Key '{}' not found", key)));
    }
    Ok(Json(DeleteResponse::new(key)))
}

/// Handler for DELETE /clear
pub async fn clear_handler(State(state): State<AppState>) -> Json<MessageResponse> {
    state.manager.clear().await;
    Json(MessageResponse::new("Cache cleared"))
}

/// Handler for POST /reload
pub async fn reload_handler(State(state): State<AppState>) -> Json<MessageResponse> {
    let config = (state.config_source)();
    let backend = config.backend;
    state.manager.reload(config).await;
    Json(MessageResponse::new(format!(
        "Configuration reloaded (backend: {})",
        backend
    )))
}
