//! Configuration for the matching engine.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Configuration for the matching engine and the precompute pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Directory holding the JSON corpus and persisted match sets.
    pub data_dir: PathBuf,

    /// Retrieval sizes.
    pub retrieval: RetrievalConfig,

    /// Embedding provider configuration.
    pub embedding: EmbeddingConfig,

    /// Generative judge configuration.
    pub judge: JudgeConfig,

    /// Precompute pipeline configuration.
    pub pipeline: PipelineConfig,

    /// External service settings.
    pub service: ServiceConfig,
}

impl MatchingConfig {
    /// Create a configuration with default values rooted at `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            judge: JudgeConfig::default(),
            pipeline: PipelineConfig::default(),
            service: ServiceConfig::default(),
        }
    }

    /// Read a TOML configuration file and validate it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml(&content)
    }

    /// Parse a TOML document and validate it.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Set the coarse and final retrieval sizes.
    pub fn with_sizes(mut self, coarse_k: usize, final_n: usize) -> Self {
        self.retrieval.coarse_k = coarse_k;
        self.retrieval.final_n = final_n;
        self
    }

    /// Set the embedding dimension.
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.embedding.dimension = dimension;
        self
    }

    /// Set the pipeline configuration.
    pub fn with_pipeline(mut self, pipeline: PipelineConfig) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let r = &self.retrieval;
        if r.coarse_k == 0 {
            return Err(EngineError::Config("retrieval.coarse_k must be > 0".into()));
        }
        if r.final_n == 0 {
            return Err(EngineError::Config("retrieval.final_n must be > 0".into()));
        }
        if r.final_n > r.coarse_k {
            return Err(EngineError::Config(format!(
                "retrieval.final_n ({}) must not exceed retrieval.coarse_k ({})",
                r.final_n, r.coarse_k
            )));
        }
        if self.embedding.dimension == 0 {
            return Err(EngineError::Config("embedding.dimension must be > 0".into()));
        }
        let p = &self.pipeline;
        if p.concurrency == 0 {
            return Err(EngineError::Config("pipeline.concurrency must be > 0".into()));
        }
        if p.synthetic_batch_size == 0 || p.match_batch_size == 0 {
            return Err(EngineError::Config("pipeline batch sizes must be > 0".into()));
        }
        Ok(())
    }
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self::new(dirs::data_dir().unwrap_or_default().join("confmatch"))
    }
}

/// Retrieval sizes and pool selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Candidates kept by the coarse retriever (K).
    pub coarse_k: usize,

    /// Candidates kept after re-ranking (N).
    pub final_n: usize,

    /// Which request embeddings offerings are matched against.
    pub request_pool: RequestPoolSource,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            coarse_k: 50,
            final_n: 25,
            request_pool: RequestPoolSource::Native,
        }
    }
}

/// Source of the vectors in the request pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestPoolSource {
    /// Each request's own embedding.
    #[default]
    Native,
    /// Each request's synthetic-offering embedding.
    Synthetic,
}

/// Configuration for the embedding provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Embedding model name.
    pub model: String,

    /// Output dimensionality (D).
    pub dimension: usize,

    /// Base URL of the embedding API.
    pub base_url: Option<String>,

    /// Maximum number of cached query embeddings.
    pub cache_max_entries: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "gemini-embedding-001".to_string(),
            dimension: confmatch_embeddings::DEFAULT_DIMENSION,
            base_url: None,
            cache_max_entries: 10000,
        }
    }
}

/// Configuration for the generative judge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgeConfig {
    /// Generative model name.
    pub model: String,

    /// Base URL of the generative API.
    pub base_url: Option<String>,

    /// Sampling temperature, if overridden.
    pub temperature: Option<f32>,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.5-pro".to_string(),
            base_url: None,
            temperature: None,
        }
    }
}

/// Configuration for the precompute pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum in-flight external calls.
    pub concurrency: usize,

    /// Pause after each external call, per task (in milliseconds).
    pub call_delay_ms: u64,

    /// Synthetic offerings persisted per store call.
    pub synthetic_batch_size: usize,

    /// Match sets persisted per store call.
    pub match_batch_size: usize,
}

impl PipelineConfig {
    pub fn call_delay(&self) -> Duration {
        Duration::from_millis(self.call_delay_ms)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            call_delay_ms: 100,
            synthetic_batch_size: 50,
            match_batch_size: 10,
        }
    }
}

/// External service settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// HTTP timeout for each embedding or judge call (in seconds).
    pub request_timeout_secs: u64,
}

impl ServiceConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_are_valid() {
        let config = MatchingConfig::new("/tmp/confmatch");
        assert_eq!(config.retrieval.coarse_k, 50);
        assert_eq!(config.retrieval.final_n, 25);
        assert_eq!(config.pipeline.concurrency, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = MatchingConfig::from_toml(
            r#"
            data_dir = "/srv/confmatch"

            [retrieval]
            coarse_k = 20
            final_n = 5
            request_pool = "synthetic"

            [pipeline]
            concurrency = 1
            "#,
        )
        .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/srv/confmatch"));
        assert_eq!(config.retrieval.coarse_k, 20);
        assert_eq!(config.retrieval.request_pool, RequestPoolSource::Synthetic);
        assert_eq!(config.pipeline.concurrency, 1);
        assert_eq!(config.pipeline.call_delay_ms, 100);
        assert_eq!(config.embedding.model, "gemini-embedding-001");
    }

    #[test]
    fn test_validate_rejects_bad_sizes() {
        let base = MatchingConfig::new("/tmp/confmatch");

        assert!(base.clone().with_sizes(0, 0).validate().is_err());
        assert!(base.clone().with_sizes(10, 0).validate().is_err());
        assert!(base.clone().with_sizes(10, 11).validate().is_err());
        assert!(base.clone().with_sizes(10, 10).validate().is_ok());
        assert!(base.clone().with_dimension(0).validate().is_err());

        let mut no_workers = base;
        no_workers.pipeline.concurrency = 0;
        assert!(no_workers.validate().is_err());
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = MatchingConfig::from_toml("[retrieval]\ncoarse_k = \"many\"").unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }
}
