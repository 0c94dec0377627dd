//! Error types for the matching engine.

use thiserror::Error;

use crate::model::{AttendeeId, EntityId};

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur in the matching engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The query text was empty or whitespace.
    #[error("query text is empty")]
    EmptyQuery,

    /// No offering or request with this identifier.
    #[error("unknown entity: {0}")]
    UnknownEntity(EntityId),

    /// No attendee with this identifier.
    #[error("unknown attendee: {0}")]
    UnknownAttendee(AttendeeId),

    /// A request could not be restated as an offering.
    #[error("transformation failed: {0}")]
    TransformationFailed(String),

    /// Embedding error.
    #[error("embedding error: {0}")]
    Embedding(#[from] confmatch_embeddings::EmbeddingError),

    /// Judge error.
    #[error("judge error: {0}")]
    Judge(#[from] confmatch_judge::JudgeError),

    /// Corpus store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// A match violated a corpus invariant.
    #[error("integrity violation: {0}")]
    Integrity(String),
}

/// Result type alias for corpus store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Corpus store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The backing store cannot be reached or opened.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Failed to read a file.
    #[error("failed to read file: {0}")]
    ReadFile(String),

    /// Failed to write a file.
    #[error("failed to write file: {0}")]
    WriteFile(String),

    /// Failed to delete a file.
    #[error("failed to delete file: {0}")]
    DeleteFile(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A write referenced an entity the store does not hold.
    #[error("unknown entity: {0}")]
    UnknownEntity(EntityId),
}
