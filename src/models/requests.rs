//! Request DTOs for the admin API
//!
//! Defines the structure of incoming HTTP request bodies.

use std::collections::HashMap;

use serde::Deserialize;

use crate::cache::pattern;

/// Request body for `POST /invalidate`
#[derive(Debug, Clone, Deserialize)]
pub struct InvalidateRequest {
    /// Key patterns, generic ones are expanded through the hierarchy
    pub patterns: Vec<String>,
}

impl InvalidateRequest {
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        if self.patterns.is_empty() {
            return Some("At least one pattern is required".to_string());
        }
        self.patterns
            .iter()
            .find(|p| !pattern::is_valid(p))
            .map(|p| format!("Invalid pattern '{}': '*' is only allowed at the end", p))
    }
}

/// Request body for `POST /invalidate/chain`
#[derive(Debug, Clone, Deserialize)]
pub struct ChainInvalidateRequest {
    /// Registered chain name
    pub chain: String,
    /// Values for the chain's `{placeholder}` tokens
    #[serde(default)]
    pub vars: HashMap<String, String>,
}
