//! In-memory embedding store with exact top-k search.

use std::hash::Hash;

use indexmap::IndexMap;
use ordered_float::OrderedFloat;
use tracing::debug;

use crate::Embedding;
use crate::error::{EmbeddingError, Result};
use crate::similarity::{dot_product, normalize};

/// A search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct Scored<K> {
    /// Key of the matched entry.
    pub key: K,

    /// Cosine similarity to the query.
    pub score: f32,

    /// Insertion position of the entry in the store.
    pub position: usize,
}

/// An insertion-ordered pool of unit-normalized embeddings.
///
/// Every vector is normalized on insert, so similarity is a plain dot
/// product. Search is a brute-force scan; ties are broken by insertion
/// order, which makes results reproducible for a given load order.
#[derive(Debug, Clone)]
pub struct EmbeddingStore<K> {
    entries: IndexMap<K, Embedding>,
    dimension: usize,
}

impl<K> EmbeddingStore<K>
where
    K: Hash + Eq + Clone,
{
    /// Create an empty store for vectors of `dimension` components.
    pub fn new(dimension: usize) -> Self {
        Self {
            entries: IndexMap::new(),
            dimension,
        }
    }

    /// Expected vector dimension.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Add or replace an embedding. Replacing keeps the original position.
    pub fn insert(&mut self, key: K, mut embedding: Embedding) -> Result<()> {
        if embedding.len() != self.dimension {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.len(),
            });
        }

        normalize(&mut embedding)?;
        self.entries.insert(key, embedding);
        Ok(())
    }

    /// Get an embedding by key.
    pub fn get(&self, key: &K) -> Option<&[f32]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    /// Check if a key exists in the store.
    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of stored embeddings.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &[f32])> {
        self.entries.iter().map(|(k, v)| (k, v.as_slice()))
    }

    /// Return the `k` entries most similar to `query` that pass `keep`.
    ///
    /// Results are sorted by descending score; equal scores keep insertion
    /// order. The query is normalized before scoring.
    pub fn search<F>(&self, query: &[f32], k: usize, keep: F) -> Result<Vec<Scored<K>>>
    where
        F: Fn(&K) -> bool,
    {
        if query.len() != self.dimension {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        if k == 0 || self.entries.is_empty() {
            return Ok(Vec::new());
        }

        let mut query = query.to_vec();
        normalize(&mut query)?;

        let mut scored: Vec<(usize, f32)> = Vec::with_capacity(self.entries.len());
        for (position, (key, embedding)) in self.entries.iter().enumerate() {
            if !keep(key) {
                continue;
            }
            let score = dot_product(&query, embedding)?.clamp(-1.0, 1.0);
            scored.push((position, score));
        }

        // `sort_by` is stable, so ties stay in insertion order.
        scored.sort_by(|a, b| OrderedFloat(b.1).cmp(&OrderedFloat(a.1)));
        scored.truncate(k);

        debug!(
            "Scored {} of {} entries, keeping {}",
            scored.len(),
            self.entries.len(),
            k
        );

        Ok(scored
            .into_iter()
            .filter_map(|(position, score)| {
                self.entries
                    .get_index(position)
                    .map(|(key, _)| Scored {
                        key: key.clone(),
                        score,
                        position,
                    })
            })
            .collect())
    }
}
