//! Precomputation of match sets for every offering and request.
//!
//! A run walks the corpus in stages:
//!
//! 1. optionally embed statements that have no embedding yet
//! 2. give every request without one a synthetic offering
//! 3. retrieve the coarse top-K offerings for each request
//! 4. retrieve the coarse top-K requests for each offering
//!
//! Stages 1 and 2 call external services with bounded concurrency and
//! persist each batch before moving past it, so an interrupted run keeps
//! what it paid for. A failed batch is logged and counted, and the next run
//! fills the gap. Re-ranking is left to read time.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use confmatch_embeddings::{Embedding, EmbeddingProvider, EmbeddingRequest};
use confmatch_judge::GenerativeJudge;

use crate::config::MatchingConfig;
use crate::corpus::CorpusSnapshot;
use crate::error::Result;
use crate::model::{EntityId, MatchSet, Offering, Request, RequestId, SyntheticOffering};
use crate::retriever::CoarseRetriever;
use crate::store::CorpusStore;
use crate::transform::SyntheticQueryTransformer;

/// Options for a single pipeline run.
#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    /// Delete every persisted match set before computing.
    pub clear_existing: bool,

    /// Skip sources that already have a persisted match set.
    pub resume: bool,

    /// Embed offerings and requests that have no embedding.
    pub embed_missing: bool,
}

/// Summary of a pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineReport {
    /// Native embeddings computed and persisted.
    pub embeddings_generated: usize,

    /// Native embeddings that could not be computed or persisted.
    pub embeddings_failed: usize,

    /// Synthetic offerings generated and persisted.
    pub synthetic_generated: usize,

    /// Requests that already had a synthetic offering.
    pub synthetic_skipped: usize,

    /// Synthetic offerings that could not be generated or persisted.
    pub synthetic_failed: usize,

    /// Match sets persisted.
    pub match_sets_written: usize,

    /// Sources skipped because a match set already existed.
    pub match_sets_skipped: usize,

    /// Match sets that could not be computed or persisted.
    pub match_sets_failed: usize,

    /// Store batches that failed to persist.
    pub failed_batches: usize,

    /// Matches dropped by integrity validation.
    pub rejected_matches: usize,

    /// Whether the run was cancelled before finishing.
    pub cancelled: bool,

    /// Wall-clock duration of the run (in milliseconds).
    pub elapsed_ms: u64,
}

/// Drives synthetic-offering generation and coarse retrieval over the
/// whole corpus.
pub struct PrecomputePipeline {
    config: MatchingConfig,
    store: Arc<dyn CorpusStore>,
    provider: Arc<dyn EmbeddingProvider>,
    transformer: SyntheticQueryTransformer,
    retriever: CoarseRetriever,
    cancel: CancellationToken,
}

impl PrecomputePipeline {
    pub fn new(
        config: MatchingConfig,
        store: Arc<dyn CorpusStore>,
        provider: Arc<dyn EmbeddingProvider>,
        judge: Arc<dyn GenerativeJudge>,
    ) -> Self {
        Self {
            retriever: CoarseRetriever::new(config.retrieval.coarse_k),
            transformer: SyntheticQueryTransformer::new(judge),
            config,
            store,
            provider,
            cancel: CancellationToken::new(),
        }
    }

    /// Use an externally owned cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that stops the run: no new calls are scheduled once it fires,
    /// calls already in flight finish and their results are kept.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the pipeline.
    ///
    /// Only a failure to read the corpus aborts the run; per-entity and
    /// per-batch failures are counted in the report.
    pub async fn run(&self, options: &PipelineOptions) -> Result<PipelineReport> {
        let start_time = Instant::now();
        self.config.validate()?;

        let mut report = PipelineReport::default();

        if options.clear_existing {
            let removed = self.store.clear_match_sets().await?;
            info!("Cleared {removed} existing match sets");
        }

        let attendees = self.store.attendees().await?;
        let mut offerings = self.store.offerings().await?;
        let mut requests = self.store.requests().await?;
        info!(
            "Precomputing matches for {} offerings and {} requests",
            offerings.len(),
            requests.len()
        );

        if options.embed_missing {
            self.embed_missing(&mut offerings, &mut requests, &mut report)
                .await;
        }
        self.generate_synthetic(&mut requests, &mut report).await;

        let snapshot = CorpusSnapshot::from_parts(
            attendees,
            offerings,
            requests,
            self.config.embedding.dimension,
            self.config.retrieval.request_pool,
        );

        let existing: HashSet<EntityId> = if options.resume {
            self.store.match_set_sources().await?.into_iter().collect()
        } else {
            HashSet::new()
        };

        self.compute_match_sets(&snapshot, &existing, &mut report)
            .await;

        report.cancelled = self.cancel.is_cancelled();
        report.elapsed_ms = u64::try_from(start_time.elapsed().as_millis()).unwrap_or(u64::MAX);

        info!(
            "Pipeline {} in {}ms: {} embedded ({} failed), {} synthetic ({} skipped, {} failed)",
            if report.cancelled { "cancelled" } else { "complete" },
            report.elapsed_ms,
            report.embeddings_generated,
            report.embeddings_failed,
            report.synthetic_generated,
            report.synthetic_skipped,
            report.synthetic_failed,
        );
        info!(
            "Match sets: {} written, {} skipped, {} failed, {} rejected matches",
            report.match_sets_written,
            report.match_sets_skipped,
            report.match_sets_failed,
            report.rejected_matches,
        );

        Ok(report)
    }

    /// Embed statements whose embedding is missing.
    ///
    /// Offerings and requests are batched separately, one provider batch call
    /// per store batch, and each batch is persisted as soon as it arrives.
    async fn embed_missing(
        &self,
        offerings: &mut [Offering],
        requests: &mut [Request],
        report: &mut PipelineReport,
    ) {
        let missing_offerings: Vec<(EntityId, String)> = offerings
            .iter()
            .filter(|o| o.embedding.is_none())
            .map(|o| (o.entity_id(), o.text.clone()))
            .collect();
        let missing_requests: Vec<(EntityId, String)> = requests
            .iter()
            .filter(|r| r.embedding.is_none())
            .map(|r| (r.entity_id(), r.text.clone()))
            .collect();
        let (missing_offerings, blank_offerings) = without_blank(missing_offerings);
        let (missing_requests, blank_requests) = without_blank(missing_requests);
        for entity in blank_offerings.iter().chain(&blank_requests) {
            warn!("Cannot embed {entity}: its text is blank");
        }
        report.embeddings_failed += blank_offerings.len() + blank_requests.len();

        let total = missing_offerings.len() + missing_requests.len();
        if total == 0 {
            return;
        }
        info!("Embedding {total} statements without an embedding");

        // Each batch holds one kind, so each save rewrites one table.
        let batch_size = self.config.pipeline.synthetic_batch_size;
        let batches = into_batches(missing_offerings, batch_size)
            .into_iter()
            .chain(into_batches(missing_requests, batch_size));

        let offering_index: HashMap<_, _> =
            offerings.iter().enumerate().map(|(i, o)| (o.id, i)).collect();
        let request_index: HashMap<_, _> =
            requests.iter().enumerate().map(|(i, r)| (r.id, i)).collect();

        let provider = self.provider.as_ref();
        let delay = self.config.pipeline.call_delay();
        let cancel = &self.cancel;
        let mut embedded = stream::iter(batches)
            .map(|batch| async move {
                if cancel.is_cancelled() {
                    return (batch, None);
                }
                let texts = batch
                    .iter()
                    .map(|(_, text)| EmbeddingRequest::new(text.as_str()))
                    .collect();
                let outcome = provider.embed_batch(texts).await;
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                (batch, Some(outcome))
            })
            .buffered(self.config.pipeline.concurrency);

        while let Some((batch, outcome)) = embedded.next().await {
            let count = batch.len();
            let responses = match outcome {
                Some(Ok(responses)) if responses.len() == count => responses,
                Some(Ok(responses)) => {
                    warn!(
                        "Provider returned {} embeddings for a batch of {count}",
                        responses.len()
                    );
                    report.embeddings_failed += count;
                    continue;
                }
                Some(Err(e)) => {
                    warn!("Failed to embed a batch of {count} statements: {e}");
                    report.embeddings_failed += count;
                    continue;
                }
                None => continue,
            };

            let computed: Vec<(EntityId, Embedding)> = batch
                .into_iter()
                .zip(responses)
                .map(|((entity, _), response)| (entity, response.embedding))
                .collect();
            if let Err(e) = self.store.save_embeddings(computed.clone()).await {
                error!("Failed to persist a batch of {count} embeddings: {e}");
                report.failed_batches += 1;
                report.embeddings_failed += count;
                continue;
            }
            report.embeddings_generated += count;

            for (entity, embedding) in computed {
                match entity {
                    EntityId::Offering(id) => {
                        if let Some(&i) = offering_index.get(&id) {
                            offerings[i].embedding = Some(embedding);
                        }
                    }
                    EntityId::Request(id) => {
                        if let Some(&i) = request_index.get(&id) {
                            requests[i].embedding = Some(embedding);
                        }
                    }
                }
            }
        }
    }

    /// Give every unprocessed request a synthetic offering.
    ///
    /// Requests are handled one store batch at a time; a batch is persisted
    /// before the next one starts, so an interrupted run keeps its progress.
    async fn generate_synthetic(&self, requests: &mut [Request], report: &mut PipelineReport) {
        let pending: Vec<(RequestId, String)> = requests
            .iter()
            .filter(|r| !r.has_synthetic())
            .map(|r| (r.id, r.text.clone()))
            .collect();
        report.synthetic_skipped = requests.len() - pending.len();
        if pending.is_empty() {
            debug!("Every request already has a synthetic offering");
            return;
        }
        info!(
            "Generating synthetic offerings for {} requests ({} already done)",
            pending.len(),
            report.synthetic_skipped
        );

        let index: HashMap<_, _> = requests.iter().enumerate().map(|(i, r)| (r.id, i)).collect();
        let transformer = &self.transformer;
        let provider = self.provider.as_ref();

        for batch in into_batches(pending, self.config.pipeline.synthetic_batch_size) {
            if self.cancel.is_cancelled() {
                info!("Cancelled, not generating further synthetic offerings");
                break;
            }

            let texts: Vec<String> = batch.iter().map(|(_, text)| text.clone()).collect();
            let outcomes = self
                .bounded(texts, |text| async move {
                    transformer.synthesize(&text, provider).await
                })
                .await;

            let mut generated: Vec<(RequestId, SyntheticOffering)> = Vec::new();
            for ((id, _), outcome) in batch.into_iter().zip(outcomes) {
                match outcome {
                    Some(Ok(synthetic)) => generated.push((id, synthetic)),
                    Some(Err(e)) => {
                        warn!("Failed to generate a synthetic offering for request {id}: {e}");
                        report.synthetic_failed += 1;
                    }
                    None => {}
                }
            }
            if generated.is_empty() {
                continue;
            }

            let count = generated.len();
            if let Err(e) = self.store.save_synthetic_offerings(generated.clone()).await {
                error!("Failed to persist a batch of {count} synthetic offerings: {e}");
                report.failed_batches += 1;
                report.synthetic_failed += count;
                continue;
            }
            report.synthetic_generated += count;
            for (id, synthetic) in generated {
                if let Some(&i) = index.get(&id) {
                    requests[i].synthetic_offering = Some(synthetic);
                }
            }
        }
    }

    /// Retrieve and persist match sets for every request, then every offering.
    async fn compute_match_sets(
        &self,
        snapshot: &CorpusSnapshot,
        existing: &HashSet<EntityId>,
        report: &mut PipelineReport,
    ) {
        let sources: Vec<EntityId> = snapshot
            .requests()
            .map(Request::entity_id)
            .chain(snapshot.offerings().map(Offering::entity_id))
            .collect();

        let batch_size = self.config.pipeline.match_batch_size;
        let mut pending: Vec<MatchSet> = Vec::with_capacity(batch_size);

        for source in sources {
            if self.cancel.is_cancelled() {
                info!("Cancelled, not computing further match sets");
                break;
            }
            let Some(query) = snapshot.query_embedding(source) else {
                continue;
            };
            if existing.contains(&source) {
                report.match_sets_skipped += 1;
                continue;
            }

            let pool = snapshot.pool_for(source.kind());
            let candidates = match self
                .retriever
                .retrieve(query, pool, snapshot.owner_of(source))
            {
                Ok(candidates) => candidates,
                Err(e) => {
                    warn!("Failed to retrieve matches for {source}: {e}");
                    report.match_sets_failed += 1;
                    continue;
                }
            };

            let mut set = MatchSet::ranked(
                source,
                candidates.iter().map(|c| (c.entity, c.similarity_score)),
            );
            report.rejected_matches += snapshot.enforce_integrity(&mut set);
            pending.push(set);

            if pending.len() >= batch_size {
                self.flush(&mut pending, report).await;
            }
        }
        self.flush(&mut pending, report).await;
    }

    async fn flush(&self, pending: &mut Vec<MatchSet>, report: &mut PipelineReport) {
        if pending.is_empty() {
            return;
        }
        let batch = std::mem::take(pending);
        let count = batch.len();
        match self.store.save_match_sets(batch).await {
            Ok(()) => {
                debug!("Persisted {count} match sets");
                report.match_sets_written += count;
            }
            Err(e) => {
                error!("Failed to persist a batch of {count} match sets: {e}");
                report.failed_batches += 1;
                report.match_sets_failed += count;
            }
        }
    }

    /// Run `call` over `items` with at most `concurrency` calls in flight.
    ///
    /// Outputs line up with `items`. `None` marks items never started because
    /// the run was cancelled.
    async fn bounded<I, O, F, Fut>(&self, items: Vec<I>, call: F) -> Vec<Option<O>>
    where
        F: Fn(I) -> Fut,
        Fut: Future<Output = O>,
    {
        let delay = self.config.pipeline.call_delay();
        let cancel = &self.cancel;
        let call = &call;

        let mut outputs: Vec<(usize, Option<O>)> = stream::iter(items.into_iter().enumerate())
            .map(|(position, item)| async move {
                if cancel.is_cancelled() {
                    return (position, None);
                }
                let output = call(item).await;
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                (position, Some(output))
            })
            .buffer_unordered(self.config.pipeline.concurrency)
            .collect()
            .await;

        outputs.sort_by_key(|(position, _)| *position);
        outputs.into_iter().map(|(_, output)| output).collect()
    }
}

/// Split `items` into consecutive batches of at most `size`.
fn into_batches<T>(items: Vec<T>, size: usize) -> Vec<Vec<T>> {
    let size = size.max(1);
    let mut batches = Vec::with_capacity(items.len().div_ceil(size));
    let mut items = items.into_iter().peekable();
    while items.peek().is_some() {
        batches.push(items.by_ref().take(size).collect());
    }
    batches
}

/// Separate statements with blank text, which no provider will embed.
fn without_blank(items: Vec<(EntityId, String)>) -> (Vec<(EntityId, String)>, Vec<EntityId>) {
    let (kept, blank): (Vec<_>, Vec<_>) =
        items.into_iter().partition(|(_, text)| !text.trim().is_empty());
    (kept, blank.into_iter().map(|(entity, _)| entity).collect())
}
