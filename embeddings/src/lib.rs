//! # Embeddings
//!
//! Embedding generation and exact similarity search for attendee matching.
//!
//! - **Providers**: turn offering/request statements into unit-length vectors
//! - **Similarity**: cosine/dot-product math over normalized vectors
//! - **Embedding Store**: insertion-ordered pool with brute-force top-k search
//! - **Caching**: LRU cache for repeated serve-time query embeddings
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Embeddings                                   │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  EmbeddingProvider ──► Embedding ──► EmbeddingStore             │
//! │       │                                   │                     │
//! │       ▼                                   ▼                     │
//! │  Gemini / CachedProvider           search (top-k, filtered)     │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod cache;
pub mod error;
pub mod provider;
pub mod similarity;
pub mod store;

pub use cache::{CacheStats, CachedProvider, EmbeddingCache};
pub use error::{EmbeddingError, Result};
pub use provider::{EmbeddingProvider, EmbeddingRequest, EmbeddingResponse, GeminiProvider};
pub use similarity::{UNIT_NORM_TOLERANCE, cosine_similarity, dot_product, is_unit, normalize};
pub use store::{EmbeddingStore, Scored};

/// A dense vector embedding.
pub type Embedding = Vec<f32>;

/// Output dimensionality requested from the embedding model.
pub const DEFAULT_DIMENSION: usize = 1536; // gemini-embedding-001, truncated
