//! Error types for the judgment service.

use thiserror::Error;

/// Result type alias for judge operations.
pub type Result<T> = std::result::Result<T, JudgeError>;

/// Errors that can occur while calling the generative judge.
#[derive(Error, Debug)]
pub enum JudgeError {
    /// Judge not configured (missing API key).
    #[error("judge not configured")]
    NotConfigured,

    /// API request failed.
    #[error("API request failed: {0}")]
    ApiRequest(String),

    /// The model answered with no usable text.
    #[error("judge returned empty output")]
    EmptyOutput,

    /// The model answered, but not in the expected shape.
    #[error("malformed judge output: {0}")]
    MalformedOutput(String),

    /// Rate limit exceeded.
    #[error("rate limit exceeded")]
    RateLimited,

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP error (including timeouts).
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}
