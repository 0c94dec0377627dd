//! Embedding cache for serve-time queries.
//!
//! Ad-hoc searches often repeat the same text (a user refining a search, or
//! the same synthetic offering being looked up twice). The cache keys on
//! `(model, text)` and evicts least-recently-used entries.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::Embedding;
use crate::error::{EmbeddingError, Result};
use crate::provider::{EmbeddingProvider, EmbeddingRequest, EmbeddingResponse};

type CacheKey = (String, String);

/// LRU cache of computed embeddings.
pub struct EmbeddingCache {
    entries: Mutex<LruCache<CacheKey, Embedding>>,
    max_entries: NonZeroUsize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl EmbeddingCache {
    /// Create a cache holding at most `max_entries` embeddings (minimum 1).
    pub fn new(max_entries: usize) -> Self {
        let max_entries = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(max_entries)),
            max_entries,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn key(text: &str, model: &str) -> CacheKey {
        (model.to_string(), text.to_string())
    }

    /// Get an embedding from the cache.
    pub async fn get(&self, text: &str, model: &str) -> Option<Embedding> {
        let found = self.entries.lock().await.get(&Self::key(text, model)).cloned();
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    /// Put an embedding in the cache.
    pub async fn put(&self, text: &str, model: &str, embedding: Embedding) {
        self.entries
            .lock()
            .await
            .put(Self::key(text, model), embedding);
        debug!("Cached embedding for text (model: {model})");
    }

    /// Check if an embedding is cached without touching recency.
    pub async fn contains(&self, text: &str, model: &str) -> bool {
        self.entries.lock().await.contains(&Self::key(text, model))
    }

    /// Clear the entire cache.
    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }

    /// Get cache statistics.
    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.lock().await.len(),
            max_entries: self.max_entries.get(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

/// Statistics about the embedding cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of entries in cache.
    pub entries: usize,

    /// Maximum cache size.
    pub max_entries: usize,

    /// Lookups answered from the cache.
    pub hits: u64,

    /// Lookups that fell through to the provider.
    pub misses: u64,
}

/// A provider wrapper that answers repeated texts from an [`EmbeddingCache`].
pub struct CachedProvider {
    inner: Arc<dyn EmbeddingProvider>,
    cache: EmbeddingCache,
}

impl CachedProvider {
    /// Wrap `inner` with a cache of `max_entries` embeddings.
    pub fn new(inner: Arc<dyn EmbeddingProvider>, max_entries: usize) -> Self {
        Self {
            inner,
            cache: EmbeddingCache::new(max_entries),
        }
    }

    /// Get the underlying cache.
    pub fn cache(&self) -> &EmbeddingCache {
        &self.cache
    }
}

#[async_trait]
impl EmbeddingProvider for CachedProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse> {
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.inner.model().to_string());

        if let Some(embedding) = self.cache.get(&request.text, &model).await {
            debug!("Cache hit for embedding");
            return Ok(EmbeddingResponse { embedding, model });
        }

        let text = request.text.clone();
        let response = self.inner.embed(request).await?;
        self.cache
            .put(&text, &model, response.embedding.clone())
            .await;

        Ok(response)
    }

    /// Answer cached texts locally and send the rest to the inner provider
    /// in a single batch.
    async fn embed_batch(&self, requests: Vec<EmbeddingRequest>) -> Result<Vec<EmbeddingResponse>> {
        let mut responses: Vec<Option<EmbeddingResponse>> = Vec::with_capacity(requests.len());
        let mut misses: Vec<(usize, String, String)> = Vec::new();
        let mut miss_requests = Vec::new();

        for (position, request) in requests.into_iter().enumerate() {
            let model = request
                .model
                .clone()
                .unwrap_or_else(|| self.inner.model().to_string());
            match self.cache.get(&request.text, &model).await {
                Some(embedding) => responses.push(Some(EmbeddingResponse { embedding, model })),
                None => {
                    responses.push(None);
                    misses.push((position, request.text.clone(), model));
                    miss_requests.push(request);
                }
            }
        }

        if !miss_requests.is_empty() {
            debug!("Embedding {} uncached texts", miss_requests.len());
            let computed = self.inner.embed_batch(miss_requests).await?;
            if computed.len() != misses.len() {
                return Err(EmbeddingError::InvalidResponse(format!(
                    "expected {} embeddings, got {}",
                    misses.len(),
                    computed.len()
                )));
            }
            for ((position, text, model), response) in misses.into_iter().zip(computed) {
                self.cache
                    .put(&text, &model, response.embedding.clone())
                    .await;
                responses[position] = Some(response);
            }
        }

        responses
            .into_iter()
            .map(|response| {
                response.ok_or_else(|| {
                    EmbeddingError::InvalidResponse("missing batch embedding".to_string())
                })
            })
            .collect()
    }

    fn is_available(&self) -> bool {
        self.inner.is_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingProvider {
        calls: AtomicUsize,
        batch_sizes: std::sync::Mutex<Vec<usize>>,
    }

    impl CountingProvider {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                batch_sizes: std::sync::Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for CountingProvider {
        fn name(&self) -> &str {
            "counting"
        }

        fn model(&self) -> &str {
            "m"
        }

        fn dimension(&self) -> usize {
            2
        }

        async fn embed(&self, _request: EmbeddingRequest) -> Result<EmbeddingResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(EmbeddingResponse {
                embedding: vec![1.0, 0.0],
                model: "m".to_string(),
            })
        }

        async fn embed_batch(
            &self,
            requests: Vec<EmbeddingRequest>,
        ) -> Result<Vec<EmbeddingResponse>> {
            self.batch_sizes.lock().unwrap().push(requests.len());
            Ok(requests
                .iter()
                .map(|r| EmbeddingResponse {
                    embedding: vec![r.text.len() as f32, 0.0],
                    model: "m".to_string(),
                })
                .collect())
        }

        fn is_available(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_cache_put_get() {
        let cache = EmbeddingCache::new(100);
        cache.put("hello", "model-1", vec![1.0, 2.0, 3.0]).await;

        assert_eq!(cache.get("hello", "model-1").await, Some(vec![1.0, 2.0, 3.0]));
        assert_eq!(cache.get("hello", "model-2").await, None);

        let stats = cache.stats().await;
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[tokio::test]
    async fn test_cache_evicts_least_recently_used() {
        let cache = EmbeddingCache::new(2);
        cache.put("a", "model", vec![1.0]).await;
        cache.put("b", "model", vec![2.0]).await;
        // touch "a" so "b" is the eviction candidate
        let _ = cache.get("a", "model").await;
        cache.put("c", "model", vec![3.0]).await;

        assert!(cache.contains("a", "model").await);
        assert!(!cache.contains("b", "model").await);
        assert_eq!(cache.stats().await.entries, 2);
    }

    #[tokio::test]
    async fn test_cached_provider_calls_inner_once() {
        let inner = Arc::new(CountingProvider::new());
        let cached = CachedProvider::new(inner.clone(), 10);

        cached.embed_text("same text").await.unwrap();
        cached.embed_text("same text").await.unwrap();

        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cached_batch_sends_only_misses() {
        let inner = Arc::new(CountingProvider::new());
        let cached = CachedProvider::new(inner.clone(), 10);
        cached.embed_text("seen").await.unwrap();

        let responses = cached
            .embed_batch(vec![
                EmbeddingRequest::new("a"),
                EmbeddingRequest::new("seen"),
                EmbeddingRequest::new("ccc"),
            ])
            .await
            .unwrap();

        let firsts: Vec<f32> = responses.iter().map(|r| r.embedding[0]).collect();
        assert_eq!(firsts, vec![1.0, 1.0, 3.0]);
        assert_eq!(*inner.batch_sizes.lock().unwrap(), vec![2]);
        assert!(cached.cache().contains("ccc", "m").await);

        cached
            .embed_batch(vec![EmbeddingRequest::new("a"), EmbeddingRequest::new("ccc")])
            .await
            .unwrap();
        assert_eq!(*inner.batch_sizes.lock().unwrap(), vec![2]);
    }
}
