//! In-memory catalog index with optional cluster partitioning.
//!
//! `VectorStore` owns the catalog: a matrix of unit-normalized embeddings
//! and an index-aligned label list. Entries are append-only. An optional
//! partition (k-means centroids plus per-row assignments) enables
//! approximate search; without it every search is exact.

use crate::vector::clustering::{kmeans, nearest_centroid};
use crate::vector::similarity::{normalized, similarity_to_all};
use crate::vector::types::{ClusterId, Score, VectorDimension, VectorError};

/// Search algorithm selector for [`VectorStore::search`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchMode {
    /// Exhaustive comparison against every catalog row.
    #[default]
    Exact,
    /// Probe the nearest clusters only. Falls back to exact when no
    /// partition exists or the probed clusters are empty.
    Approximate,
}

/// Cluster partition over the catalog: centroids plus per-row assignments.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Partition {
    pub(crate) centroids: Vec<Vec<f32>>,
    pub(crate) assignments: Vec<ClusterId>,
}

/// Catalog of (label, embedding) pairs with optional cluster partitioning.
///
/// Invariants: `labels.len() == embeddings.len()` at every observable point;
/// every stored row has unit L2 norm; when a partition exists its assignment
/// list has the same length as the catalog.
///
/// Duplicate labels are legal and independently retrievable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorStore {
    pub(crate) embeddings: Vec<Vec<f32>>,
    pub(crate) labels: Vec<String>,
    pub(crate) partition: Option<Partition>,
    pub(crate) dimension: Option<VectorDimension>,
}

impl VectorStore {
    /// Creates an empty store. The dimension is fixed by the first entry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store from a flat embedding/label list.
    ///
    /// Every embedding is normalized to unit length; a zero-norm embedding
    /// is a [`VectorError::DegenerateEmbedding`].
    pub fn from_entries(
        embeddings: Vec<Vec<f32>>,
        labels: Vec<String>,
    ) -> Result<Self, VectorError> {
        let mut store = Self::new();
        store.add_entries(embeddings, labels)?;
        Ok(store)
    }

    /// Number of catalog entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Catalog labels in insertion order.
    #[must_use]
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Dimension of stored embeddings, once the first entry fixed it.
    #[must_use]
    pub fn dimension(&self) -> Option<VectorDimension> {
        self.dimension
    }

    /// Whether a cluster partition exists (approximate search available).
    #[must_use]
    pub fn has_partition(&self) -> bool {
        self.partition.is_some()
    }

    /// Number of clusters in the partition, 0 without one.
    #[must_use]
    pub fn cluster_count(&self) -> usize {
        self.partition.as_ref().map_or(0, |p| p.centroids.len())
    }

    /// Appends entries to the catalog.
    ///
    /// Succeeds on an empty store (establishing the dimension from the first
    /// row). When a partition exists, each new row is assigned to its
    /// nearest existing centroid; centroids are never recomputed here.
    pub fn add_entries(
        &mut self,
        embeddings: Vec<Vec<f32>>,
        labels: Vec<String>,
    ) -> Result<(), VectorError> {
        if embeddings.len() != labels.len() {
            return Err(VectorError::LabelCountMismatch {
                labels: labels.len(),
                rows: embeddings.len(),
            });
        }

        // Normalize and validate everything before mutating, so a failed
        // call leaves the catalog untouched.
        let mut rows = Vec::with_capacity(embeddings.len());
        for embedding in embeddings {
            if let Some(dim) = self.dimension {
                dim.validate_vector(&embedding)?;
            }
            let row = normalized(&embedding)?;
            if self.dimension.is_none() {
                self.dimension = Some(VectorDimension::new(row.len())?);
            }
            rows.push(row);
        }

        if let Some(partition) = &mut self.partition {
            for row in &rows {
                partition
                    .assignments
                    .push(nearest_centroid(row, &partition.centroids));
            }
        }

        self.labels.extend(labels);
        self.embeddings.extend(rows);
        Ok(())
    }

    /// Builds (or rebuilds) the cluster partition.
    ///
    /// Degenerate catalogs of 0 or 1 entries skip partitioning entirely and
    /// degrade to exact-only search. An oversized `n_clusters` is clamped to
    /// `max(1, len / 2)`; the adjustment is logged, never an error.
    pub fn build_partition(&mut self, n_clusters: usize) -> Result<(), VectorError> {
        if self.len() < 2 {
            tracing::debug!(
                entries = self.len(),
                "catalog too small to partition, exact search only"
            );
            self.partition = None;
            return Ok(());
        }

        let k = if n_clusters == 0 || n_clusters >= self.len() {
            let clamped = (self.len() / 2).max(1);
            tracing::debug!(
                requested = n_clusters,
                clamped,
                entries = self.len(),
                "adjusted cluster count to fit catalog"
            );
            clamped
        } else {
            n_clusters
        };

        let result =
            kmeans(&self.embeddings, k).map_err(|e| VectorError::ClusteringFailed(e.to_string()))?;

        self.partition = Some(Partition {
            centroids: result.centroids,
            assignments: result.assignments,
        });
        Ok(())
    }

    /// Maps a vector to its nearest centroid.
    ///
    /// Returns `None` when no partition exists. The same assignment rule is
    /// used during partition construction and when appending rows.
    #[must_use]
    pub fn assign(&self, vector: &[f32]) -> Option<ClusterId> {
        self.partition
            .as_ref()
            .map(|p| nearest_centroid(vector, &p.centroids))
    }

    /// Returns the top-`k` most similar catalog entries, descending by
    /// score. Ties break by catalog insertion order.
    ///
    /// `n_probe` is the number of nearest clusters examined in approximate
    /// mode; it is ignored in exact mode.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        mode: SearchMode,
        n_probe: usize,
    ) -> Result<Vec<(String, Score)>, VectorError> {
        if self.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(dim) = self.dimension {
            dim.validate_vector(query)?;
        }

        let query = normalized(query)?;

        match mode {
            SearchMode::Exact => self.search_rows(&query, k, None),
            SearchMode::Approximate => {
                let Some(partition) = &self.partition else {
                    // Approximate search is an optimization, never a
                    // correctness requirement.
                    return self.search_rows(&query, k, None);
                };

                let probed = Self::nearest_clusters(&query, &partition.centroids, n_probe);
                let candidates: Vec<usize> = partition
                    .assignments
                    .iter()
                    .enumerate()
                    .filter(|(_, cluster)| probed.contains(cluster))
                    .map(|(i, _)| i)
                    .collect();

                if candidates.is_empty() {
                    tracing::debug!("probed clusters are empty, falling back to exact search");
                    return self.search_rows(&query, k, None);
                }

                self.search_rows(&query, k, Some(&candidates))
            }
        }
    }

    /// Exact comparison over all rows, or a restricted subset of row
    /// indices when `subset` is given.
    fn search_rows(
        &self,
        query: &[f32],
        k: usize,
        subset: Option<&[usize]>,
    ) -> Result<Vec<(String, Score)>, VectorError> {
        let mut scored: Vec<(usize, Score)> = match subset {
            None => similarity_to_all(query, &self.embeddings)
                .into_iter()
                .enumerate()
                .map(|(i, s)| Ok((i, Score::new(s)?)))
                .collect::<Result<_, VectorError>>()?,
            Some(indices) => indices
                .iter()
                .map(|&i| {
                    let s = crate::vector::similarity::dot(query, &self.embeddings[i]);
                    Ok((i, Score::new(s)?))
                })
                .collect::<Result<_, VectorError>>()?,
        };

        // Stable sort keeps insertion order among equal scores, so results
        // are deterministic and reproducible.
        scored.sort_by(|a, b| b.1.cmp(&a.1));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| (self.labels[i].clone(), score))
            .collect())
    }

    /// Ids of the `n_probe` centroids most similar to the query.
    fn nearest_clusters(query: &[f32], centroids: &[Vec<f32>], n_probe: usize) -> Vec<ClusterId> {
        let mut ranked: Vec<(usize, f32)> = similarity_to_all(query, centroids)
            .into_iter()
            .enumerate()
            .collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked
            .into_iter()
            .take(n_probe.max(1))
            .map(|(i, _)| ClusterId::new_unchecked((i + 1) as u32))
            .collect()
    }
}
