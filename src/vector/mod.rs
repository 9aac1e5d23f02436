//! Catalog index and similarity search.
//!
//! The index partitions a catalog of (label, embedding) pairs with k-means
//! clustering so approximate search can probe only the nearest clusters,
//! while exact search remains available as the correctness baseline. The
//! catalog persists to a two-artifact directory layout (binary vectors plus
//! a JSON partition model).

mod clustering;
mod persist;
mod similarity;
mod store;
mod types;

pub use clustering::{ClusteringError, KMeansResult, kmeans, nearest_centroid};
pub use persist::{PARTITION_FILE, PersistError, VECTORS_FILE};
pub use similarity::{cosine_similarity, dot, normalize, normalized, similarity_to_all};
pub use store::{SearchMode, VectorStore};
pub use types::{ClusterId, Score, VectorDimension, VectorError};
