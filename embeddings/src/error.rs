use thiserror::Error;

pub type Result<T> = std::result::Result<T, EmbeddingError>;

#[derive(Error, Debug)]
pub enum EmbeddingError {
    /// No API key was found for the provider.
    #[error("embedding provider has no API key (set GEMINI_API_KEY)")]
    ProviderNotConfigured,

    /// The provider answered with a non-success status.
    #[error("embedding request rejected: {0}")]
    ApiRequest(String),

    /// The provider answered, but not with a usable vector.
    #[error("unusable embedding response: {0}")]
    InvalidResponse(String),

    /// HTTP 429 from the provider.
    #[error("embedding quota exhausted; retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Two vectors, or a vector and a store, disagree on length.
    #[error("expected a {expected}-dimensional vector, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Zero or non-finite magnitude; such a vector has no direction.
    #[error("cannot normalize a vector with norm {norm}")]
    Degenerate { norm: f32 },

    #[error("refusing to embed blank text")]
    EmptyText,

    #[error("malformed embedding payload: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("embedding transport failed: {0}")]
    Http(#[from] reqwest::Error),
}
