//! Error types for the shopping assistant.

use thiserror::Error;

/// Errors that can occur when talking to the assistant upstream.
#[derive(Debug, Error)]
pub enum AssistantError {
    /// No API key configured.
    #[error("assistant is not configured")]
    Disabled,

    /// The request from the client failed validation.
    #[error("{0}")]
    InvalidInput(String),

    /// The client could not be built from configuration.
    #[error("invalid assistant configuration: {0}")]
    Configuration(String),

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Upstream returned an error.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status from the upstream.
        status: u16,
        /// Error message.
        message: String,
    },

    /// Rate limited by the upstream.
    #[error("rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// Authentication with the upstream failed.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Failed to parse response.
    #[error("parse error: {0}")]
    Parse(String),

    /// The upstream answered without any text.
    #[error("empty reply from upstream")]
    EmptyReply,
}

/// Error body of an OpenAI-compatible API.
#[derive(Debug, serde::Deserialize)]
pub struct ApiErrorResponse {
    /// Error details.
    pub error: ApiError,
}

/// Error details.
#[derive(Debug, serde::Deserialize)]
pub struct ApiError {
    /// Error message.
    pub message: String,
    /// Error type, when the upstream sends one.
    #[serde(rename = "type", default)]
    pub error_type: Option<String>,
}
