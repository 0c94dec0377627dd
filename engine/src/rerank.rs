//! Fine re-ranking of a coarse shortlist by the generative judge.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use ordered_float::OrderedFloat;
use tracing::{debug, warn};

use confmatch_judge::{GenerativeJudge, QueryType, RerankCandidate};

/// Outcome of a re-rank: indices into the candidate list, best first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reranked {
    pub indices: Vec<usize>,

    /// True when the judge's answer was unusable and the coarse order was kept.
    pub fallback: bool,
}

/// Asks the judge to pick the substantively relevant candidates.
///
/// Never fails: any judge error, timeout or unusable answer falls back to the
/// top `n` candidates by similarity.
#[derive(Clone)]
pub struct FineReranker {
    judge: Arc<dyn GenerativeJudge>,
    n: usize,
    timeout: Option<Duration>,
}

impl FineReranker {
    pub fn new(judge: Arc<dyn GenerativeJudge>, n: usize) -> Self {
        Self {
            judge,
            n,
            timeout: None,
        }
    }

    /// Bound each judge call. Timing out triggers the fallback.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Number of candidates kept.
    pub fn n(&self) -> usize {
        self.n
    }

    /// Select and order at most `n` of `candidates` for `query_text`.
    pub async fn rerank(
        &self,
        query_text: &str,
        query_type: QueryType,
        candidates: &[RerankCandidate],
    ) -> Reranked {
        if candidates.is_empty() {
            return Reranked {
                indices: Vec::new(),
                fallback: false,
            };
        }

        let call = self.judge.rerank(query_text, query_type, candidates, self.n);
        let answer = match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, call).await {
                Ok(answer) => answer,
                Err(_) => {
                    warn!("Judge {} timed out after {timeout:?}", self.judge.name());
                    return self.fallback(candidates);
                }
            },
            None => call.await,
        };

        let raw = match answer {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Judge {} failed to re-rank: {e}", self.judge.name());
                return self.fallback(candidates);
            }
        };

        let indices = self.validate(raw, candidates.len());
        if indices.is_empty() {
            warn!(
                "Judge {} kept none of {} candidates, using similarity order",
                self.judge.name(),
                candidates.len()
            );
            return self.fallback(candidates);
        }

        debug!("Re-ranked {} candidates to {}", candidates.len(), indices.len());
        Reranked {
            indices,
            fallback: false,
        }
    }

    /// Drop out-of-range and repeated indices, then cap at `n`.
    fn validate(&self, raw: Vec<usize>, len: usize) -> Vec<usize> {
        let mut seen = HashSet::new();
        let mut indices = Vec::with_capacity(raw.len().min(self.n));
        for index in raw {
            if index >= len {
                warn!("Dropping out-of-range candidate index {index} (have {len})");
                continue;
            }
            if !seen.insert(index) {
                warn!("Dropping repeated candidate index {index}");
                continue;
            }
            indices.push(index);
        }
        indices.truncate(self.n);
        indices
    }

    /// Top `n` by raw similarity. Ties keep their input order.
    fn fallback(&self, candidates: &[RerankCandidate]) -> Reranked {
        let mut indices: Vec<usize> = (0..candidates.len()).collect();
        indices.sort_by_key(|&i| std::cmp::Reverse(OrderedFloat(candidates[i].similarity_score)));
        indices.truncate(self.n);
        Reranked {
            indices,
            fallback: true,
        }
    }
}
