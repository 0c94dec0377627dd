//! Coarse retrieval: exact cosine top-K over a candidate pool.

use std::collections::HashMap;

use tracing::debug;

use confmatch_embeddings::{Embedding, EmbeddingStore};
use confmatch_judge::QueryType;

use crate::error::{EngineError, Result};
use crate::model::{AttendeeId, EntityId};

/// Embeddings of one kind of statement, with the owner of each.
///
/// Pool order is insertion order and breaks score ties.
pub struct CandidatePool {
    kind: QueryType,
    embeddings: EmbeddingStore<EntityId>,
    owners: HashMap<EntityId, AttendeeId>,
}

impl CandidatePool {
    /// Create an empty pool of `kind` statements with `dimension`-sized vectors.
    pub fn new(kind: QueryType, dimension: usize) -> Self {
        Self {
            kind,
            embeddings: EmbeddingStore::new(dimension),
            owners: HashMap::new(),
        }
    }

    /// Add a statement. The embedding is normalized on insert.
    pub fn insert(
        &mut self,
        entity: EntityId,
        owner: AttendeeId,
        embedding: Embedding,
    ) -> Result<()> {
        if entity.kind() != self.kind {
            return Err(EngineError::Integrity(format!(
                "{entity} does not belong in a {} pool",
                self.kind
            )));
        }
        self.embeddings.insert(entity, embedding)?;
        self.owners.insert(entity, owner);
        Ok(())
    }

    /// Kind of statement held by this pool.
    pub fn kind(&self) -> QueryType {
        self.kind
    }

    pub fn dimension(&self) -> usize {
        self.embeddings.dimension()
    }

    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }

    pub fn contains(&self, entity: &EntityId) -> bool {
        self.embeddings.contains(entity)
    }

    /// Owner of a pooled statement.
    pub fn owner(&self, entity: &EntityId) -> Option<AttendeeId> {
        self.owners.get(entity).copied()
    }
}

/// A statement surfaced by coarse retrieval.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub entity: EntityId,

    pub owner: AttendeeId,

    /// Cosine similarity to the query.
    pub similarity_score: f32,
}

/// Brute-force top-K retriever.
#[derive(Debug, Clone, Copy)]
pub struct CoarseRetriever {
    k: usize,
}

impl CoarseRetriever {
    pub fn new(k: usize) -> Self {
        Self { k }
    }

    /// Number of candidates kept.
    pub fn k(&self) -> usize {
        self.k
    }

    /// Return the `k` pooled statements most similar to `query`.
    ///
    /// Statements owned by `exclude` are never returned. Results are sorted by
    /// descending similarity; ties keep pool order.
    pub fn retrieve(
        &self,
        query: &[f32],
        pool: &CandidatePool,
        exclude: Option<AttendeeId>,
    ) -> Result<Vec<Candidate>> {
        let keep = |entity: &EntityId| match exclude {
            Some(excluded) => pool.owner(entity) != Some(excluded),
            None => true,
        };

        let scored = pool.embeddings.search(query, self.k, keep)?;

        debug!(
            "Retrieved {} of {} {} candidates",
            scored.len(),
            pool.len(),
            pool.kind
        );

        Ok(scored
            .into_iter()
            .filter_map(|s| {
                pool.owner(&s.key).map(|owner| Candidate {
                    entity: s.key,
                    owner,
                    similarity_score: s.score,
                })
            })
            .collect())
    }
}
