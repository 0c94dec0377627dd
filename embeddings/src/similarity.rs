//! Similarity computation for embeddings.
//!
//! Every vector that enters an [`EmbeddingStore`](crate::EmbeddingStore) is
//! unit-normalized, so cosine similarity reduces to a dot product.

use crate::error::{EmbeddingError, Result};

/// Maximum deviation of `‖v‖₂` from 1.0 still accepted as unit length.
pub const UNIT_NORM_TOLERANCE: f32 = 1e-3;

/// Compute the dot product between two embeddings.
pub fn dot_product(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(EmbeddingError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }

    Ok(a.iter().zip(b.iter()).map(|(x, y)| x * y).sum())
}

/// Compute the cosine similarity between two embeddings of any length.
///
/// Returns a value in `[-1.0, 1.0]`; zero-magnitude inputs score 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    let dot = dot_product(a, b)?;
    let magnitude_a = l2_norm(a);
    let magnitude_b = l2_norm(b);

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return Ok(0.0);
    }

    Ok((dot / (magnitude_a * magnitude_b)).clamp(-1.0, 1.0))
}

/// Euclidean length of a vector.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Normalize a vector to unit length in place.
pub fn normalize(v: &mut [f32]) -> Result<()> {
    let norm = l2_norm(v);
    if norm == 0.0 || !norm.is_finite() {
        return Err(EmbeddingError::Degenerate { norm });
    }
    for x in v.iter_mut() {
        *x /= norm;
    }
    Ok(())
}

/// Whether `v` has unit length within [`UNIT_NORM_TOLERANCE`].
pub fn is_unit(v: &[f32]) -> bool {
    (l2_norm(v) - 1.0).abs() <= UNIT_NORM_TOLERANCE
}
