//! HTTP server error types

use thiserror::Error;

/// Errors that can occur while running the HTTP surface
#[derive(Debug, Error)]
pub enum HttpError {
    /// Failed to bind to the specified address
    #[error("Failed to bind HTTP server to {address}: {source}")]
    BindError {
        address: String,
        source: std::io::Error,
    },

    /// HTTP server encountered a runtime error
    #[error("HTTP server error: {0}")]
    ServerError(String),
}
