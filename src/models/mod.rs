//! Request and Response models for the admin API
//!
//! DTOs used for serializing/deserializing HTTP request and response bodies.

pub mod requests;
pub mod responses;

// Re-export commonly used types
pub use requests::{ChainInvalidateRequest, InvalidateRequest};
pub use responses::{
    DeleteResponse, ErrorResponse, HealthResponse, InvalidateResponse, MessageResponse,
};
