//! # Matching Engine
//!
//! Pairs what conference attendees can *offer* with what others *request*.
//!
//! - **Synthetic queries**: a request is restated as the offering that would
//!   satisfy it, so requests and offerings are compared in one vector space
//! - **Coarse retrieval**: exact cosine top-K, never matching an attendee
//!   with themselves
//! - **Fine re-ranking**: a generative judge keeps the best N of the K, with
//!   a similarity-order fallback
//! - **Precomputation**: match sets for every statement, persisted in
//!   batches and safe to re-run
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Matching Engine                           │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  request ──► SyntheticQueryTransformer ──► EmbeddingProvider    │
//! │  offering ─────────────────────────────────────┘                │
//! │                                                 │               │
//! │                                                 ▼               │
//! │  CorpusStore ──► CorpusSnapshot ──► CoarseRetriever (top-K)     │
//! │                                                 │               │
//! │                      PrecomputePipeline ◄───────┤               │
//! │                        (persist K)              ▼               │
//! │                                        FineReranker (best N)    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use confmatch_engine::{JsonCorpusStore, MatchingConfig, MatchingEngine};
//!
//! let config = MatchingConfig::load("confmatch.toml")?;
//! let store = Arc::new(JsonCorpusStore::open(&config.data_dir).await?);
//! let engine = MatchingEngine::new(config, store, provider, judge).await?;
//!
//! let matches = engine
//!     .retrieve_and_rerank("Need AI safety mentorship", QueryType::Request, None)
//!     .await?;
//! ```

pub mod config;
pub mod corpus;
pub mod engine;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod rerank;
pub mod retriever;
pub mod store;
pub mod transform;

pub use config::{MatchingConfig, RequestPoolSource};
pub use corpus::CorpusSnapshot;
pub use engine::{AttendeeMatches, CorpusStats, EntityMatches, MatchingEngine, RankedMatch};
pub use error::{EngineError, Result, StoreError, StoreResult};
pub use model::{
    Attendee, AttendeeId, EntityId, Match, MatchDirection, MatchSet, Offering, OfferingId,
    Request, RequestId, SyntheticOffering,
};
pub use pipeline::{PipelineOptions, PipelineReport, PrecomputePipeline};
pub use rerank::{FineReranker, Reranked};
pub use retriever::{Candidate, CandidatePool, CoarseRetriever};
pub use store::{CorpusStore, JsonCorpusStore, MemoryCorpus};
pub use transform::SyntheticQueryTransformer;

// Re-export from dependencies for convenience
pub use confmatch_embeddings::{Embedding, EmbeddingProvider};
pub use confmatch_judge::{GenerativeJudge, QueryType};
