//! Error types for the OpenRouter client.

use thiserror::Error;

/// Errors returned by the OpenRouter client.
#[derive(Debug, Error)]
pub enum OpenRouterError {
    /// Configuration problem (missing key, bad base URL).
    #[error("configuration error: {0}")]
    Config(String),

    /// Network-level failure.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The API returned a non-success status.
    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    /// The response body did not match the expected shape.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

/// Result alias for client operations.
pub type Result<T> = std::result::Result<T, OpenRouterError>;
