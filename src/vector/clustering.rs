//! K-means clustering for the partitioned catalog index.
//!
//! Cosine similarity is the distance metric throughout, with k-means++
//! initialization for stable convergence. Centroids are kept unit-normalized
//! so assignment reduces to a dot product against normalized rows.

use crate::vector::similarity::{EPSILON, cosine_similarity, normalized};
use crate::vector::types::ClusterId;
use rand::Rng;
use thiserror::Error;

/// Maximum number of iterations for the k-means loop.
const MAX_ITERATIONS: usize = 100;

/// Convergence tolerance for centroid movement between iterations.
const CONVERGENCE_TOLERANCE: f32 = 1e-4;

/// Result of a k-means clustering run.
#[derive(Debug, Clone, PartialEq)]
pub struct KMeansResult {
    /// Unit-normalized cluster centroids, same dimension as the input rows.
    pub centroids: Vec<Vec<f32>>,

    /// Cluster assignment for each input row, index-aligned.
    pub assignments: Vec<ClusterId>,

    /// Number of iterations until convergence (or the iteration cap).
    pub iterations: usize,
}

/// Errors that can occur during clustering.
#[derive(Error, Debug)]
pub enum ClusteringError {
    #[error(
        "Empty vector set provided for clustering\nSuggestion: Embed the catalog before partitioning it"
    )]
    EmptyVectorSet,

    #[error("Invalid cluster count: {0}\nSuggestion: Use k between 1 and the number of vectors")]
    InvalidClusterCount(usize),

    #[error(
        "Dimension mismatch in vectors\nSuggestion: Ensure all embeddings come from the same producer"
    )]
    DimensionMismatch,

    #[error(
        "Failed to initialize centroids\nSuggestion: Check that vectors contain valid floating-point values"
    )]
    InitializationFailed,
}

/// Partitions a set of vectors into `k` clusters by cosine similarity.
///
/// Rows are expected to be unit-normalized already (the catalog normalizes
/// at insertion time). Assignment and update steps alternate until
/// assignments stop changing, centroid movement drops below tolerance, or
/// the iteration cap is hit.
#[must_use = "clustering results should be used or the computation is wasted"]
pub fn kmeans(vectors: &[Vec<f32>], k: usize) -> Result<KMeansResult, ClusteringError> {
    if vectors.is_empty() {
        return Err(ClusteringError::EmptyVectorSet);
    }
    if k == 0 || k > vectors.len() {
        return Err(ClusteringError::InvalidClusterCount(k));
    }
    let dimension = vectors[0].len();
    if vectors.iter().any(|v| v.len() != dimension) {
        return Err(ClusteringError::DimensionMismatch);
    }

    let mut centroids = init_centroids(vectors, k)?;
    let mut assignments = vec![ClusterId::new_unchecked(1); vectors.len()];
    let mut iterations = 0;

    loop {
        iterations += 1;

        let new_assignments: Vec<ClusterId> = vectors
            .iter()
            .map(|row| nearest_centroid(row, &centroids))
            .collect();

        let converged = new_assignments == assignments;
        assignments = new_assignments;

        if converged || iterations >= MAX_ITERATIONS {
            break;
        }

        let new_centroids = recompute_centroids(vectors, &assignments, k);
        let movement = mean_centroid_movement(&centroids, &new_centroids);
        centroids = new_centroids;

        if movement < CONVERGENCE_TOLERANCE {
            break;
        }
    }

    if iterations >= MAX_ITERATIONS {
        // Results are still usable, just not fully converged.
        tracing::warn!("k-means did not fully converge after {MAX_ITERATIONS} iterations");
    }

    Ok(KMeansResult {
        centroids,
        assignments,
        iterations,
    })
}

/// Returns the id of the centroid most similar to `vector`.
///
/// The same rule is used during partition construction, for routing queries,
/// and for assigning appended rows, so assignment stays consistent across
/// the index lifecycle.
#[must_use]
pub fn nearest_centroid(vector: &[f32], centroids: &[Vec<f32>]) -> ClusterId {
    let mut best_similarity = f32::NEG_INFINITY;
    let mut best_index = 0;

    for (i, centroid) in centroids.iter().enumerate() {
        let similarity = cosine_similarity(vector, centroid);
        if similarity > best_similarity {
            best_similarity = similarity;
            best_index = i;
        }
    }

    // ClusterId is 1-indexed.
    ClusterId::new_unchecked((best_index + 1) as u32)
}

/// Recomputes each centroid as the normalized mean of its assigned rows.
fn recompute_centroids(
    vectors: &[Vec<f32>],
    assignments: &[ClusterId],
    k: usize,
) -> Vec<Vec<f32>> {
    let dimension = vectors[0].len();
    let mut sums = vec![vec![0.0f32; dimension]; k];
    let mut sizes = vec![0usize; k];

    for (row, cluster) in vectors.iter().zip(assignments.iter()) {
        let idx = cluster.index();
        for (acc, &value) in sums[idx].iter_mut().zip(row.iter()) {
            *acc += value;
        }
        sizes[idx] += 1;
    }

    let mut rng = rand::rng();
    sums.into_iter()
        .zip(sizes)
        .map(|(mut centroid, size)| {
            if size == 0 {
                // Empty cluster: reseed from a random row.
                let row = &vectors[rng.random_range(0..vectors.len())];
                return row.clone();
            }
            for value in centroid.iter_mut() {
                *value /= size as f32;
            }
            // The mean of opposing unit vectors can collapse to near-zero;
            // keep the unnormalized mean in that case.
            normalized(&centroid).unwrap_or(centroid)
        })
        .collect()
}

/// K-means++ initialization: later centroids are drawn with probability
/// proportional to squared cosine distance from the nearest existing one.
fn init_centroids(vectors: &[Vec<f32>], k: usize) -> Result<Vec<Vec<f32>>, ClusteringError> {
    let mut rng = rand::rng();
    let mut centroids = Vec::with_capacity(k);

    let first = rng.random_range(0..vectors.len());
    centroids.push(vectors[first].clone());

    while centroids.len() < k {
        let mut distances = vec![0.0f32; vectors.len()];
        let mut total = 0.0f32;

        for (i, row) in vectors.iter().enumerate() {
            let mut min_distance = f32::MAX;
            for centroid in &centroids {
                let distance = 1.0 - cosine_similarity(row, centroid);
                min_distance = min_distance.min(distance);
            }
            distances[i] = min_distance * min_distance;
            total += distances[i];
        }

        if total < EPSILON {
            // All remaining points coincide with existing centroids; pad by
            // repeating rows so the caller still gets k centroids.
            let row = rng.random_range(0..vectors.len());
            centroids.push(vectors[row].clone());
            continue;
        }

        let target = rng.random::<f32>() * total;
        let mut cumulative = 0.0;
        let mut chosen = None;
        for (i, &distance) in distances.iter().enumerate() {
            cumulative += distance;
            if cumulative >= target {
                chosen = Some(i);
                break;
            }
        }

        // Rounding can leave the target unreached; fall back to the last row.
        let idx = chosen.unwrap_or(vectors.len() - 1);
        centroids.push(vectors[idx].clone());
    }

    if centroids.len() != k {
        return Err(ClusteringError::InitializationFailed);
    }
    Ok(centroids)
}

/// Mean cosine distance between old and new centroid positions.
fn mean_centroid_movement(old: &[Vec<f32>], new: &[Vec<f32>]) -> f32 {
    old.iter()
        .zip(new.iter())
        .map(|(a, b)| 1.0 - cosine_similarity(a, b))
        .sum::<f32>()
        / old.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::similarity::normalized;

    fn unit(values: &[f32]) -> Vec<f32> {
        normalized(values).unwrap()
    }

    #[test]
    fn nearest_centroid_picks_most_similar() {
        let centroids = vec![
            vec![1.0, 0.0, 0.0],
            vec![0.0, 1.0, 0.0],
            vec![0.0, 0.0, 1.0],
        ];

        let cluster = nearest_centroid(&unit(&[0.9, 0.1, 0.0]), &centroids);
        assert_eq!(cluster.get(), 1);

        let cluster = nearest_centroid(&unit(&[0.1, 0.9, 0.1]), &centroids);
        assert_eq!(cluster.get(), 2);

        let cluster = nearest_centroid(&unit(&[0.0, 0.1, 0.9]), &centroids);
        assert_eq!(cluster.get(), 3);
    }

    #[test]
    fn kmeans_groups_similar_rows() {
        let vectors = vec![
            // Along the x axis
            unit(&[1.0, 0.1, 0.0]),
            unit(&[0.9, 0.2, 0.1]),
            unit(&[1.1, 0.0, 0.2]),
            // Along the y axis
            unit(&[0.1, 1.0, 0.0]),
            unit(&[0.2, 0.9, 0.1]),
            unit(&[0.0, 1.1, 0.2]),
            // Along the z axis
            unit(&[0.0, 0.1, 1.0]),
            unit(&[0.1, 0.2, 0.9]),
            unit(&[0.2, 0.0, 1.1]),
        ];

        let result = kmeans(&vectors, 3).unwrap();

        assert_eq!(result.centroids.len(), 3);
        assert_eq!(result.assignments.len(), 9);
        assert!(result.iterations <= MAX_ITERATIONS);

        // Rows along the same axis land in the same cluster.
        for group in [[0, 1, 2], [3, 4, 5], [6, 7, 8]] {
            let first = result.assignments[group[0]];
            assert_eq!(result.assignments[group[1]], first);
            assert_eq!(result.assignments[group[2]], first);
        }
    }

    #[test]
    fn kmeans_single_cluster() {
        let vectors = vec![
            unit(&[1.0, 2.0, 3.0]),
            unit(&[4.0, 5.0, 6.0]),
            unit(&[7.0, 8.0, 9.0]),
        ];

        let result = kmeans(&vectors, 1).unwrap();

        assert_eq!(result.centroids.len(), 1);
        let first = result.assignments[0];
        assert!(result.assignments.iter().all(|&c| c == first));
    }

    #[test]
    fn kmeans_rejects_bad_input() {
        let empty: Vec<Vec<f32>> = vec![];
        assert!(matches!(
            kmeans(&empty, 1),
            Err(ClusteringError::EmptyVectorSet)
        ));

        let vectors = vec![unit(&[1.0, 2.0])];
        assert!(matches!(
            kmeans(&vectors, 0),
            Err(ClusteringError::InvalidClusterCount(0))
        ));

        let vectors = vec![unit(&[1.0, 2.0]), unit(&[3.0, 4.0])];
        assert!(matches!(
            kmeans(&vectors, 3),
            Err(ClusteringError::InvalidClusterCount(3))
        ));

        let vectors = vec![unit(&[1.0, 2.0]), unit(&[3.0, 4.0, 5.0])];
        assert!(matches!(
            kmeans(&vectors, 1),
            Err(ClusteringError::DimensionMismatch)
        ));
    }

    #[test]
    fn kmeans_handles_duplicate_rows() {
        // All rows identical: k-means++ pads centroids instead of looping.
        let row = unit(&[0.5, 0.5]);
        let vectors = vec![row.clone(), row.clone(), row.clone()];

        let result = kmeans(&vectors, 2).unwrap();
        assert_eq!(result.centroids.len(), 2);
        assert_eq!(result.assignments.len(), 3);
    }

    #[test]
    fn kmeans_centroids_are_unit_length() {
        let vectors = vec![
            unit(&[1.0, 0.0]),
            unit(&[0.9, 0.1]),
            unit(&[0.0, 1.0]),
            unit(&[0.1, 0.9]),
        ];

        let result = kmeans(&vectors, 2).unwrap();
        for centroid in &result.centroids {
            let norm: f32 = centroid.iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-5);
        }
    }
}
