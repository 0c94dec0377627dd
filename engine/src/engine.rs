//! The matching engine: ad-hoc search and precomputed lookups.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use confmatch_embeddings::EmbeddingProvider;
use confmatch_judge::{GenerativeJudge, QueryType, RerankCandidate};

use crate::config::MatchingConfig;
use crate::corpus::CorpusSnapshot;
use crate::error::{EngineError, Result};
use crate::model::{Attendee, AttendeeId, EntityId, MatchSet};
use crate::pipeline::{PipelineOptions, PipelineReport, PrecomputePipeline};
use crate::rerank::FineReranker;
use crate::retriever::{Candidate, CoarseRetriever};
use crate::store::CorpusStore;
use crate::transform::SyntheticQueryTransformer;

/// One re-ranked result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedMatch {
    pub target: EntityId,

    pub target_text: String,

    /// Attendee who owns the target.
    pub owner: AttendeeId,

    /// Cosine similarity from coarse retrieval.
    pub similarity_score: f32,

    /// 1-based position after re-ranking.
    pub rank: u32,
}

/// Re-ranked matches for one of an attendee's statements.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityMatches {
    pub source: EntityId,

    pub source_text: String,

    /// Whether the shortlist came from a persisted match set.
    pub precomputed: bool,

    pub matches: Vec<RankedMatch>,
}

/// Everything the engine knows to suggest for one attendee.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendeeMatches {
    pub attendee: Attendee,

    /// Offerings that answer each of the attendee's requests.
    pub who_can_help_you: Vec<EntityMatches>,

    /// Requests that each of the attendee's offerings can answer.
    pub who_you_can_help: Vec<EntityMatches>,
}

/// Counts used to verify a precompute run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CorpusStats {
    pub attendees: usize,

    pub offerings: usize,

    pub requests: usize,

    pub offerings_with_embeddings: usize,

    pub requests_with_embeddings: usize,

    pub requests_with_synthetic: usize,

    /// Persisted request-to-offering match sets.
    pub request_match_sets: usize,

    /// Persisted offering-to-request match sets.
    pub offering_match_sets: usize,

    /// Persisted matches across all sets.
    pub total_matches: usize,
}

/// Coarse-to-fine matching over a corpus.
///
/// Holds an in-memory snapshot of the corpus; call [`MatchingEngine::reload`]
/// after the store changes outside the engine.
pub struct MatchingEngine {
    config: MatchingConfig,
    store: Arc<dyn CorpusStore>,
    provider: Arc<dyn EmbeddingProvider>,
    judge: Arc<dyn GenerativeJudge>,
    transformer: SyntheticQueryTransformer,
    retriever: CoarseRetriever,
    reranker: FineReranker,
    snapshot: RwLock<Arc<CorpusSnapshot>>,
}

impl MatchingEngine {
    /// Validate `config` and load the corpus.
    pub async fn new(
        config: MatchingConfig,
        store: Arc<dyn CorpusStore>,
        provider: Arc<dyn EmbeddingProvider>,
        judge: Arc<dyn GenerativeJudge>,
    ) -> Result<Self> {
        config.validate()?;
        if provider.dimension() != config.embedding.dimension {
            return Err(EngineError::Config(format!(
                "provider {} produces {}-dimensional vectors, configured for {}",
                provider.name(),
                provider.dimension(),
                config.embedding.dimension
            )));
        }

        let snapshot = CorpusSnapshot::load(
            store.as_ref(),
            config.embedding.dimension,
            config.retrieval.request_pool,
        )
        .await?;

        info!(
            "Matching engine ready: {} offerings and {} requests pooled (K={}, N={})",
            snapshot.offering_pool().len(),
            snapshot.request_pool().len(),
            config.retrieval.coarse_k,
            config.retrieval.final_n
        );

        Ok(Self {
            transformer: SyntheticQueryTransformer::new(Arc::clone(&judge)),
            retriever: CoarseRetriever::new(config.retrieval.coarse_k),
            reranker: FineReranker::new(Arc::clone(&judge), config.retrieval.final_n),
            snapshot: RwLock::new(Arc::new(snapshot)),
            config,
            store,
            provider,
            judge,
        })
    }

    /// Bound each re-rank call; a timeout falls back to similarity order.
    pub fn with_rerank_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.reranker = self.reranker.with_timeout(timeout);
        self
    }

    pub fn config(&self) -> &MatchingConfig {
        &self.config
    }

    /// Re-read the corpus from the store.
    pub async fn reload(&self) -> Result<()> {
        let snapshot = CorpusSnapshot::load(
            self.store.as_ref(),
            self.config.embedding.dimension,
            self.config.retrieval.request_pool,
        )
        .await?;
        *self.snapshot.write().await = Arc::new(snapshot);
        debug!("Reloaded corpus snapshot");
        Ok(())
    }

    async fn snapshot(&self) -> Arc<CorpusSnapshot> {
        Arc::clone(&*self.snapshot.read().await)
    }

    /// A pipeline sharing this engine's store, provider and judge.
    pub fn pipeline(&self) -> PrecomputePipeline {
        PrecomputePipeline::new(
            self.config.clone(),
            Arc::clone(&self.store),
            Arc::clone(&self.provider),
            Arc::clone(&self.judge),
        )
    }

    /// Run `pipeline` and refresh the snapshot with its results.
    pub async fn precompute(
        &self,
        pipeline: &PrecomputePipeline,
        options: &PipelineOptions,
    ) -> Result<PipelineReport> {
        let report = pipeline.run(options).await?;
        self.reload().await?;
        Ok(report)
    }

    /// Search the corpus for a free-text statement.
    ///
    /// Requests are restated as offerings before embedding; if that fails the
    /// raw text is embedded instead. Statements owned by `exclude` are never
    /// returned.
    pub async fn retrieve_and_rerank(
        &self,
        query_text: &str,
        query_type: QueryType,
        exclude: Option<AttendeeId>,
    ) -> Result<Vec<RankedMatch>> {
        let query_text = query_text.trim();
        if query_text.is_empty() {
            return Err(EngineError::EmptyQuery);
        }

        let embed_text = match query_type {
            QueryType::Offering => query_text.to_string(),
            QueryType::Request => match self.transformer.transform(query_text).await {
                Ok(synthetic) => synthetic,
                Err(e) => {
                    warn!("Searching with the raw request text: {e}");
                    query_text.to_string()
                }
            },
        };
        let embedding = self.provider.embed_text(&embed_text).await?;

        let snapshot = self.snapshot().await;
        let candidates =
            self.retriever
                .retrieve(&embedding, snapshot.pool_for(query_type), exclude)?;

        Ok(self
            .rerank(&snapshot, query_text, query_type, candidates)
            .await)
    }

    /// The persisted coarse match set for a statement.
    ///
    /// `Ok(None)` means the statement exists but has not been precomputed.
    pub async fn lookup_precomputed(&self, entity: EntityId) -> Result<Option<MatchSet>> {
        if !self.snapshot().await.contains(entity) {
            return Err(EngineError::UnknownEntity(entity));
        }
        Ok(self.store.match_set(entity).await?)
    }

    /// Re-ranked matches for one statement, from its persisted match set when
    /// there is one and from live retrieval otherwise.
    pub async fn matches_for(&self, entity: EntityId) -> Result<EntityMatches> {
        let snapshot = self.snapshot().await;
        let source_text = snapshot
            .text_of(entity)
            .ok_or(EngineError::UnknownEntity(entity))?
            .to_string();
        let owner = snapshot.owner_of(entity);
        let query_type = entity.kind();

        let (candidates, precomputed) = match self.store.match_set(entity).await? {
            Some(set) => (stored_candidates(&snapshot, &set), true),
            None => {
                let candidates = match snapshot.query_embedding(entity) {
                    Some(query) => {
                        self.retriever
                            .retrieve(query, snapshot.pool_for(query_type), owner)?
                    }
                    None => {
                        debug!("{entity} has no precomputed vector, searching live");
                        let results = self
                            .retrieve_and_rerank(&source_text, query_type, owner)
                            .await?;
                        return Ok(EntityMatches {
                            source: entity,
                            source_text,
                            precomputed: false,
                            matches: results,
                        });
                    }
                };
                (candidates, false)
            }
        };

        let matches = self
            .rerank(&snapshot, &source_text, query_type, candidates)
            .await;
        Ok(EntityMatches {
            source: entity,
            source_text,
            precomputed,
            matches,
        })
    }

    /// Matches for every statement an attendee owns.
    pub async fn lookup_attendee(&self, attendee_id: AttendeeId) -> Result<AttendeeMatches> {
        let snapshot = self.snapshot().await;
        let attendee = snapshot
            .attendee(attendee_id)
            .cloned()
            .ok_or(EngineError::UnknownAttendee(attendee_id))?;
        let (offerings, requests) = snapshot.statements_of(attendee_id);
        let offering_ids: Vec<EntityId> = offerings.iter().map(|o| o.entity_id()).collect();
        let request_ids: Vec<EntityId> = requests.iter().map(|r| r.entity_id()).collect();

        let mut who_can_help_you = Vec::with_capacity(request_ids.len());
        for entity in request_ids {
            who_can_help_you.push(self.matches_for(entity).await?);
        }
        let mut who_you_can_help = Vec::with_capacity(offering_ids.len());
        for entity in offering_ids {
            who_you_can_help.push(self.matches_for(entity).await?);
        }

        Ok(AttendeeMatches {
            attendee,
            who_can_help_you,
            who_you_can_help,
        })
    }

    /// Matches for every attendee whose full name contains `name`, ignoring
    /// case.
    pub async fn find_attendee_by_name(&self, name: &str) -> Result<Vec<AttendeeMatches>> {
        if name.trim().is_empty() {
            return Err(EngineError::EmptyQuery);
        }
        let ids: Vec<AttendeeId> = self
            .snapshot()
            .await
            .find_attendees(name)
            .iter()
            .map(|a| a.id)
            .collect();
        info!("Found {} attendees matching {name:?}", ids.len());

        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            results.push(self.lookup_attendee(id).await?);
        }
        Ok(results)
    }

    /// An attendee by id.
    pub async fn attendee(&self, id: AttendeeId) -> Option<Attendee> {
        self.snapshot().await.attendee(id).cloned()
    }

    /// Corpus and precompute counts.
    pub async fn stats(&self) -> Result<CorpusStats> {
        let snapshot = self.snapshot().await;
        let mut stats = CorpusStats {
            attendees: snapshot.attendees().count(),
            offerings: snapshot.offerings().count(),
            requests: snapshot.requests().count(),
            offerings_with_embeddings: snapshot
                .offerings()
                .filter(|o| o.embedding.is_some())
                .count(),
            requests_with_embeddings: snapshot
                .requests()
                .filter(|r| r.embedding.is_some())
                .count(),
            requests_with_synthetic: snapshot.requests().filter(|r| r.has_synthetic()).count(),
            ..CorpusStats::default()
        };

        for source in self.store.match_set_sources().await? {
            let Some(set) = self.store.match_set(source).await? else {
                continue;
            };
            match source {
                EntityId::Request(_) => stats.request_match_sets += 1,
                EntityId::Offering(_) => stats.offering_match_sets += 1,
            }
            stats.total_matches += set.len();
        }
        Ok(stats)
    }

    async fn rerank(
        &self,
        snapshot: &CorpusSnapshot,
        query_text: &str,
        query_type: QueryType,
        candidates: Vec<Candidate>,
    ) -> Vec<RankedMatch> {
        let shown: Vec<RerankCandidate> = candidates
            .iter()
            .map(|c| {
                let entry = RerankCandidate::new(
                    snapshot.text_of(c.entity).unwrap_or_default(),
                    c.similarity_score,
                );
                match snapshot.attendee(c.owner) {
                    Some(owner) => entry.with_owner(owner.full_name(), owner.company.clone()),
                    None => entry,
                }
            })
            .collect();

        let reranked = self.reranker.rerank(query_text, query_type, &shown).await;

        reranked
            .indices
            .into_iter()
            .zip(1u32..)
            .filter_map(|(index, rank)| {
                let candidate = candidates.get(index)?;
                Some(RankedMatch {
                    target: candidate.entity,
                    target_text: shown.get(index)?.text.clone(),
                    owner: candidate.owner,
                    similarity_score: candidate.similarity_score,
                    rank,
                })
            })
            .collect()
    }
}

/// Candidates from a persisted match set whose targets are still valid.
fn stored_candidates(snapshot: &CorpusSnapshot, set: &MatchSet) -> Vec<Candidate> {
    let source_owner = snapshot.owner_of(set.source);
    set.matches
        .iter()
        .filter_map(|m| {
            let owner = snapshot.owner_of(m.target)?;
            if Some(owner) == source_owner || m.target.kind() == set.source.kind() {
                return None;
            }
            Some(Candidate {
                entity: m.target,
                owner,
                similarity_score: m.similarity_score,
            })
        })
        .collect()
}
