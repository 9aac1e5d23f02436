//! Cosine similarity kernel.
//!
//! Two forms are provided. The full form re-normalizes on every call and is
//! used where inputs may have arbitrary magnitude (clustering internals,
//! pairwise `compare`). The fast form is a plain dot product and requires
//! unit-normalized inputs: catalog rows and queries are normalized once at
//! storage/query time, never per comparison.

use crate::vector::types::VectorError;

/// Epsilon below which an L2 norm is treated as zero.
pub(crate) const EPSILON: f32 = 1e-10;

/// Computes cosine similarity between two vectors of any magnitude.
///
/// Returns 0.0 when either vector has zero norm.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vectors must have same dimension");

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot_product / (norm_a * norm_b)
    }
}

/// Dot product of two vectors.
///
/// Precondition: both vectors are unit-normalized, making this equal to
/// their cosine similarity. Callers normalize once via [`normalize`].
#[must_use]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vectors must have same dimension");
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Scores a query against every row of a catalog.
///
/// Precondition: query and rows are unit-normalized. This is the 1-by-n row
/// of the kernel's m-by-n score matrix; batch paths call it per query.
#[must_use]
pub fn similarity_to_all(query: &[f32], rows: &[Vec<f32>]) -> Vec<f32> {
    rows.iter().map(|row| dot(query, row)).collect()
}

/// Normalizes a vector in place to unit L2 length.
///
/// A zero-norm (or non-finite) vector is reported as
/// [`VectorError::DegenerateEmbedding`] rather than propagating NaN scores.
pub fn normalize(vector: &mut [f32]) -> Result<(), VectorError> {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if !norm.is_finite() || norm <= EPSILON {
        return Err(VectorError::DegenerateEmbedding);
    }
    for value in vector.iter_mut() {
        *value /= norm;
    }
    Ok(())
}

/// Returns a unit-normalized copy of a vector.
pub fn normalized(vector: &[f32]) -> Result<Vec<f32>, VectorError> {
    let mut copy = vector.to_vec();
    normalize(&mut copy)?;
    Ok(copy)
}
