//! Response DTOs for the admin API
//!
//! Defines the structure of outgoing HTTP response bodies. `GET /stats`
//! serializes [`crate::cache::CacheStatistics`] directly.

use serde::Serialize;

use crate::cache::InvalidationReport;

/// Response body for `GET /health`
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `healthy` or `degraded`
    pub status: String,
    /// Whether caching is switched on
    pub enabled: bool,
    /// Result of the active backend's health check
    pub backend_healthy: bool,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    pub fn new(enabled: bool, backend_healthy: bool) -> Self {
        let status = if backend_healthy { "healthy" } else { "degraded" };
        Self {
            status: status.to_string(),
            enabled,
            backend_healthy,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Response body for `POST /invalidate` and `POST /invalidate/chain`
#[derive(Debug, Clone, Serialize)]
pub struct InvalidateResponse {
    pub message: String,
    /// Patterns after hierarchy expansion
    pub patterns: Vec<String>,
    pub keys_removed: usize,
}

impl From<InvalidationReport> for InvalidateResponse {
    fn from(report: InvalidationReport) -> Self {
        Self {
            message: format!("Invalidated {} cache entries", report.keys_removed),
            patterns: report.patterns,
            keys_removed: report.keys_removed,
        }
    }
}

/// Response body for `DELETE /del/:key`
#[derive(Debug, Clone, Serialize)]
pub struct DeleteResponse {
    pub message: String,
    /// The key that was deleted
    pub key: String,
}

impl DeleteResponse {
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            message: format!("Key '{}' deleted successfully", key),
            key,
        }
    }
}

/// Response body for `DELETE /clear` and `POST /reload`
#[derive(Debug, Clone, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Error response body for all error conditions
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Error message describing what went wrong
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
