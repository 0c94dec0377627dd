//! Deterministic stand-ins for the embedding model, the generative judge and
//! a failing store.

#![allow(dead_code, clippy::unwrap_used)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use confmatch_embeddings::{
    Embedding, EmbeddingError, EmbeddingProvider, EmbeddingRequest, EmbeddingResponse, normalize,
};
use confmatch_engine::config::PipelineConfig;
use confmatch_engine::{
    Attendee, AttendeeId, CorpusStore, EntityId, MatchSet, MatchingConfig, MemoryCorpus, Offering,
    OfferingId, Request, RequestId, StoreError, StoreResult, SyntheticOffering,
};
use confmatch_judge::{GenerativeJudge, JudgeError, QueryType, RerankCandidate};

/// Topics the keyword embedder recognizes, one axis each.
pub const TOPICS: [&str; 5] = ["ai safety", "mentor", "biosecurity", "policy", "funding"];

/// Embeds text as a bag of known topics plus a small constant axis.
#[derive(Default)]
pub struct KeywordProvider {
    pub calls: AtomicUsize,
    /// Texts containing any of these substrings fail to embed.
    pub fail_on: Vec<String>,
    /// Size of every batch call, in call order.
    pub batch_sizes: Mutex<Vec<usize>>,
}

impl KeywordProvider {
    pub fn failing_on(pattern: &str) -> Self {
        Self {
            fail_on: vec![pattern.to_string()],
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().unwrap().clone()
    }
}

/// The vector [`KeywordProvider`] produces for `text`.
pub fn keyword_embedding(text: &str) -> Embedding {
    let lower = text.to_lowercase();
    let mut embedding: Embedding = TOPICS
        .iter()
        .map(|topic| if lower.contains(topic) { 1.0 } else { 0.0 })
        .collect();
    embedding.push(0.1);
    normalize(&mut embedding).unwrap();
    embedding
}

#[async_trait]
impl EmbeddingProvider for KeywordProvider {
    fn name(&self) -> &str {
        "keyword"
    }

    fn model(&self) -> &str {
        "keyword-v1"
    }

    fn dimension(&self) -> usize {
        TOPICS.len() + 1
    }

    async fn embed(
        &self,
        request: EmbeddingRequest,
    ) -> confmatch_embeddings::Result<EmbeddingResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_on.iter().any(|p| request.text.contains(p.as_str())) {
            return Err(EmbeddingError::ApiRequest("503: unavailable".to_string()));
        }
        Ok(EmbeddingResponse {
            embedding: keyword_embedding(&request.text),
            model: "keyword-v1".to_string(),
        })
    }

    async fn embed_batch(
        &self,
        requests: Vec<EmbeddingRequest>,
    ) -> confmatch_embeddings::Result<Vec<EmbeddingResponse>> {
        self.batch_sizes.lock().unwrap().push(requests.len());
        let mut responses = Vec::with_capacity(requests.len());
        for request in requests {
            responses.push(self.embed(request).await?);
        }
        Ok(responses)
    }

    fn is_available(&self) -> bool {
        true
    }
}

/// How the mock judge answers re-rank calls.
pub enum RerankBehavior {
    /// Pick the candidates in reverse order.
    Reverse,
    /// Always answer with these indices.
    Fixed(Vec<usize>),
    /// Fail every call.
    Fail,
}

/// Rewrites "Need X" as "I can provide X" and re-ranks per [`RerankBehavior`].
pub struct MockJudge {
    pub transform_calls: AtomicUsize,
    pub rerank_calls: AtomicUsize,
    pub behavior: RerankBehavior,
    /// Requests containing any of these substrings fail to transform.
    pub fail_transform_on: Mutex<Vec<String>>,
    /// Candidates shown on the latest re-rank call.
    pub last_candidates: Mutex<Vec<RerankCandidate>>,
}

impl MockJudge {
    pub fn new(behavior: RerankBehavior) -> Self {
        Self {
            transform_calls: AtomicUsize::new(0),
            rerank_calls: AtomicUsize::new(0),
            behavior,
            fail_transform_on: Mutex::new(Vec::new()),
            last_candidates: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_transform_on(&self, pattern: &str) {
        self.fail_transform_on.lock().unwrap().push(pattern.to_string());
    }

    pub fn heal(&self) {
        self.fail_transform_on.lock().unwrap().clear();
    }

    pub fn transform_calls(&self) -> usize {
        self.transform_calls.load(Ordering::SeqCst)
    }

    pub fn rerank_calls(&self) -> usize {
        self.rerank_calls.load(Ordering::SeqCst)
    }

    pub fn last_candidates(&self) -> Vec<RerankCandidate> {
        self.last_candidates.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerativeJudge for MockJudge {
    fn name(&self) -> &str {
        "mock"
    }

    async fn transform(&self, request_text: &str) -> confmatch_judge::Result<String> {
        self.transform_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .fail_transform_on
            .lock()
            .unwrap()
            .iter()
            .any(|p| request_text.contains(p.as_str()));
        if failing {
            return Err(JudgeError::ApiRequest("deadline exceeded".to_string()));
        }

        let need = ["Need ", "Looking for ", "Seeking "]
            .iter()
            .find_map(|prefix| request_text.strip_prefix(prefix))
            .unwrap_or(request_text);
        Ok(format!("I can provide {need}"))
    }

    async fn rerank(
        &self,
        _query_text: &str,
        _query_type: QueryType,
        candidates: &[RerankCandidate],
        n: usize,
    ) -> confmatch_judge::Result<Vec<usize>> {
        self.rerank_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_candidates.lock().unwrap() = candidates.to_vec();
        match &self.behavior {
            RerankBehavior::Reverse => Ok((0..candidates.len()).rev().take(n).collect()),
            RerankBehavior::Fixed(indices) => Ok(indices.clone()),
            RerankBehavior::Fail => Err(JudgeError::ApiRequest("deadline exceeded".to_string())),
        }
    }
}

/// A [`MockJudge`] that notes, at every transform call, how many requests
/// already have a synthetic offering in `store`.
pub struct RecordingJudge {
    pub inner: MockJudge,
    pub store: Arc<MemoryCorpus>,
    pub persisted_at_transform: Mutex<Vec<usize>>,
}

impl RecordingJudge {
    pub fn new(store: Arc<MemoryCorpus>) -> Self {
        Self {
            inner: MockJudge::new(RerankBehavior::Reverse),
            store,
            persisted_at_transform: Mutex::new(Vec::new()),
        }
    }

    pub fn persisted_at_transform(&self) -> Vec<usize> {
        self.persisted_at_transform.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerativeJudge for RecordingJudge {
    fn name(&self) -> &str {
        "recording"
    }

    async fn transform(&self, request_text: &str) -> confmatch_judge::Result<String> {
        let persisted = self
            .store
            .requests()
            .await
            .unwrap()
            .iter()
            .filter(|r| r.has_synthetic())
            .count();
        self.persisted_at_transform.lock().unwrap().push(persisted);
        self.inner.transform(request_text).await
    }

    async fn rerank(
        &self,
        query_text: &str,
        query_type: QueryType,
        candidates: &[RerankCandidate],
        n: usize,
    ) -> confmatch_judge::Result<Vec<usize>> {
        self.inner.rerank(query_text, query_type, candidates, n).await
    }
}

/// A [`MemoryCorpus`] whose writes fail for chosen statements.
pub struct FlakyStore {
    pub inner: MemoryCorpus,
    pub poisoned: Mutex<HashSet<EntityId>>,
    pub poisoned_synthetic: Mutex<HashSet<RequestId>>,
    pub poisoned_embeddings: Mutex<HashSet<EntityId>>,
}

impl FlakyStore {
    pub fn new(inner: MemoryCorpus) -> Self {
        Self {
            inner,
            poisoned: Mutex::new(HashSet::new()),
            poisoned_synthetic: Mutex::new(HashSet::new()),
            poisoned_embeddings: Mutex::new(HashSet::new()),
        }
    }

    /// Fail any batch that contains a match set for `source`.
    pub fn poison(&self, source: EntityId) {
        self.poisoned.lock().unwrap().insert(source);
    }

    /// Fail any batch that contains a synthetic offering for `request`.
    pub fn poison_synthetic(&self, request: RequestId) {
        self.poisoned_synthetic.lock().unwrap().insert(request);
    }

    /// Fail any batch that contains an embedding for `entity`.
    pub fn poison_embedding(&self, entity: EntityId) {
        self.poisoned_embeddings.lock().unwrap().insert(entity);
    }

    pub fn heal(&self) {
        self.poisoned.lock().unwrap().clear();
        self.poisoned_synthetic.lock().unwrap().clear();
        self.poisoned_embeddings.lock().unwrap().clear();
    }
}

fn connection_reset() -> StoreError {
    StoreError::Unavailable("connection reset".to_string())
}

#[async_trait]
impl CorpusStore for FlakyStore {
    async fn attendees(&self) -> StoreResult<Vec<Attendee>> {
        self.inner.attendees().await
    }

    async fn offerings(&self) -> StoreResult<Vec<Offering>> {
        self.inner.offerings().await
    }

    async fn requests(&self) -> StoreResult<Vec<Request>> {
        self.inner.requests().await
    }

    async fn save_embeddings(&self, updates: Vec<(EntityId, Embedding)>) -> StoreResult<()> {
        let poisoned = {
            let poisoned = self.poisoned_embeddings.lock().unwrap();
            updates.iter().any(|(entity, _)| poisoned.contains(entity))
        };
        if poisoned {
            return Err(connection_reset());
        }
        self.inner.save_embeddings(updates).await
    }

    async fn save_synthetic_offerings(
        &self,
        updates: Vec<(RequestId, SyntheticOffering)>,
    ) -> StoreResult<()> {
        let poisoned = {
            let poisoned = self.poisoned_synthetic.lock().unwrap();
            updates.iter().any(|(id, _)| poisoned.contains(id))
        };
        if poisoned {
            return Err(connection_reset());
        }
        self.inner.save_synthetic_offerings(updates).await
    }

    async fn save_match_sets(&self, sets: Vec<MatchSet>) -> StoreResult<()> {
        let poisoned = {
            let poisoned = self.poisoned.lock().unwrap();
            sets.iter().any(|s| poisoned.contains(&s.source))
        };
        if poisoned {
            return Err(connection_reset());
        }
        self.inner.save_match_sets(sets).await
    }

    async fn match_set(&self, source: EntityId) -> StoreResult<Option<MatchSet>> {
        self.inner.match_set(source).await
    }

    async fn match_set_sources(&self) -> StoreResult<Vec<EntityId>> {
        self.inner.match_set_sources().await
    }

    async fn clear_match_sets(&self) -> StoreResult<usize> {
        self.inner.clear_match_sets().await
    }
}

/// Four attendees with one offering and one request each.
///
/// 1. Ada Lovelace offers "AI safety mentorship, 10 yrs at a lab" and
///    requests "Need funding for a biosecurity startup".
/// 2. Alan Turing offers "Biosecurity policy connections in DC" and
///    requests "Need AI safety mentorship for a PhD student".
/// 3. Grace Hopper offers "Seed funding for biosecurity founders" and
///    requests "Need policy contacts in DC".
/// 4. Linus Torvalds offers "AI safety research mentor for students" and
///    requests "Need a mentor in AI safety".
///
/// Offering and request ids equal the owner's id.
///
/// Offerings and requests carry keyword embeddings; requests have no
/// synthetic offering yet.
pub fn conference() -> MemoryCorpus {
    let people = [
        (1, "Ada", "Lovelace"),
        (2, "Alan", "Turing"),
        (3, "Grace", "Hopper"),
        (4, "Linus", "Torvalds"),
    ];
    let offerings = [
        (1, 1, "AI safety mentorship, 10 yrs at a lab"),
        (2, 2, "Biosecurity policy connections in DC"),
        (3, 3, "Seed funding for biosecurity founders"),
        (4, 4, "AI safety research mentor for students"),
    ];
    let requests = [
        (1, 1, "Need funding for a biosecurity startup"),
        (2, 2, "Need AI safety mentorship for a PhD student"),
        (3, 3, "Need policy contacts in DC"),
        (4, 4, "Need a mentor in AI safety"),
    ];

    MemoryCorpus::new(
        people
            .iter()
            .map(|(id, first, last)| Attendee::new(AttendeeId(*id), first, last))
            .collect(),
        offerings
            .iter()
            .map(|(id, owner, text)| {
                Offering::new(OfferingId(*id), AttendeeId(*owner), *text)
                    .with_embedding(keyword_embedding(text))
            })
            .collect(),
        requests
            .iter()
            .map(|(id, owner, text)| {
                Request::new(RequestId(*id), AttendeeId(*owner), *text)
                    .with_embedding(keyword_embedding(text))
            })
            .collect(),
    )
}

/// Configuration sized for the keyword embedder, without call delays.
pub fn test_config() -> MatchingConfig {
    MatchingConfig::new("unused")
        .with_dimension(TOPICS.len() + 1)
        .with_sizes(50, 25)
        .with_pipeline(PipelineConfig {
            concurrency: 2,
            call_delay_ms: 0,
            synthetic_batch_size: 2,
            match_batch_size: 3,
        })
}
