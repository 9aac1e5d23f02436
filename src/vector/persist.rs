//! Durable persistence for the catalog index.
//!
//! An index directory holds two artifacts:
//! - `vectors.bin`: binary columnar container with a fixed header (magic,
//!   version, dimension, row count), a label block, and the embedding
//!   matrix as contiguous little-endian f32 values.
//! - `partition.json`: the cluster model (centroids plus per-row cluster
//!   ids), or an explicit `null` when the store has no partition.
//!
//! Both artifacts must be present for a successful load; there is no
//! partial load.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapOptions};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::vector::store::{Partition, VectorStore};
use crate::vector::types::{ClusterId, VectorDimension, VectorError};

/// Current storage format version.
const STORAGE_VERSION: u32 = 1;

/// Magic bytes identifying a catalog vector file.
const MAGIC_BYTES: &[u8; 4] = b"NMIX";

/// Header: magic + version + dimension + row count, 4 bytes each.
const HEADER_SIZE: usize = 16;

/// File name of the binary catalog artifact.
pub const VECTORS_FILE: &str = "vectors.bin";

/// File name of the partition model artifact.
pub const PARTITION_FILE: &str = "partition.json";

/// Errors specific to index persistence.
#[derive(Error, Debug)]
pub enum PersistError {
    #[error(
        "Nothing to persist: the index has no entries\nSuggestion: Build the index before saving it"
    )]
    NotBuilt,

    #[error(
        "Index artifact already exists: {path}\nSuggestion: Pass overwrite=true to replace existing artifacts"
    )]
    ArtifactExists { path: PathBuf },

    #[error(
        "Required index artifact missing: {path}\nSuggestion: Check the directory; both vectors.bin and partition.json are required"
    )]
    ArtifactMissing { path: PathBuf },

    #[error("Invalid index file format: {0}")]
    InvalidFormat(String),

    #[error(
        "Unsupported storage version: expected {expected}, got {actual}\nSuggestion: Rebuild the index with this version of the library"
    )]
    VersionMismatch { expected: u32, actual: u32 },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Vector error: {0}")]
    Vector(#[from] VectorError),
}

/// Serialized form of the partition model.
#[derive(Debug, Serialize, Deserialize)]
struct PartitionBlob {
    centroids: Vec<Vec<f32>>,
    assignments: Vec<u32>,
}

impl VectorStore {
    /// Persists the catalog and partition model under `dir`.
    ///
    /// Creates the directory if needed. Refuses to overwrite existing
    /// artifacts unless `overwrite` is set. Saving an empty store is an
    /// error; there is nothing to persist.
    pub fn save(&self, dir: &Path, overwrite: bool) -> Result<(), PersistError> {
        if self.is_empty() {
            return Err(PersistError::NotBuilt);
        }

        std::fs::create_dir_all(dir)?;
        let vectors_path = dir.join(VECTORS_FILE);
        let partition_path = dir.join(PARTITION_FILE);

        if !overwrite {
            for path in [&vectors_path, &partition_path] {
                if path.exists() {
                    return Err(PersistError::ArtifactExists { path: path.clone() });
                }
            }
        }

        self.write_vectors(&vectors_path)?;
        self.write_partition(&partition_path)?;

        tracing::debug!(dir = %dir.display(), entries = self.len(), "saved index");
        Ok(())
    }

    /// Loads a previously saved store from `dir`.
    ///
    /// Label order and cluster-id-to-row alignment are reconstructed
    /// exactly. A missing artifact is an error, not a partial load.
    pub fn load(dir: &Path) -> Result<Self, PersistError> {
        let vectors_path = dir.join(VECTORS_FILE);
        let partition_path = dir.join(PARTITION_FILE);

        for path in [&vectors_path, &partition_path] {
            if !path.exists() {
                return Err(PersistError::ArtifactMissing { path: path.clone() });
            }
        }

        let (embeddings, labels, dimension) = read_vectors(&vectors_path)?;
        let partition = read_partition(&partition_path, embeddings.len(), dimension)?;

        tracing::debug!(dir = %dir.display(), entries = labels.len(), "loaded index");
        Ok(Self {
            embeddings,
            labels,
            partition,
            dimension: Some(dimension),
        })
    }

    fn write_vectors(&self, path: &Path) -> Result<(), PersistError> {
        let dimension = self
            .dimension()
            .ok_or(PersistError::NotBuilt)?
            .get() as u32;

        let mut writer = BufWriter::new(File::create(path)?);

        writer.write_all(MAGIC_BYTES)?;
        writer.write_all(&STORAGE_VERSION.to_le_bytes())?;
        writer.write_all(&dimension.to_le_bytes())?;
        writer.write_all(&(self.len() as u32).to_le_bytes())?;

        // Label column: length-prefixed UTF-8 strings.
        for label in &self.labels {
            let bytes = label.as_bytes();
            writer.write_all(&(bytes.len() as u32).to_le_bytes())?;
            writer.write_all(bytes)?;
        }

        // Matrix column: contiguous little-endian f32 rows.
        for row in &self.embeddings {
            for &value in row {
                writer.write_all(&value.to_le_bytes())?;
            }
        }

        writer.flush()?;
        Ok(())
    }

    fn write_partition(&self, path: &Path) -> Result<(), PersistError> {
        let blob = self.partition.as_ref().map(|p| PartitionBlob {
            centroids: p.centroids.clone(),
            assignments: p.assignments.iter().map(|c| c.get()).collect(),
        });

        let json = serde_json::to_string(&blob)
            .map_err(|e| PersistError::Serialization(e.to_string()))?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

fn read_vectors(
    path: &Path,
) -> Result<(Vec<Vec<f32>>, Vec<String>, VectorDimension), PersistError> {
    let file = File::open(path)?;
    let mmap = unsafe { MmapOptions::new().map(&file)? };

    let (dimension, count) = read_header(&mmap)?;
    let dim = dimension.get();

    let mut offset = HEADER_SIZE;
    let mut labels = Vec::with_capacity(count);
    for _ in 0..count {
        let len = read_u32(&mmap, offset)? as usize;
        offset += 4;
        let bytes = mmap
            .get(offset..offset + len)
            .ok_or_else(|| PersistError::InvalidFormat("truncated label block".to_string()))?;
        let label = std::str::from_utf8(bytes)
            .map_err(|_| PersistError::InvalidFormat("label is not valid UTF-8".to_string()))?;
        labels.push(label.to_string());
        offset += len;
    }

    let matrix_bytes = count * dim * 4;
    if mmap.len() < offset + matrix_bytes {
        return Err(PersistError::InvalidFormat(
            "truncated embedding matrix".to_string(),
        ));
    }

    let mut embeddings = Vec::with_capacity(count);
    for _ in 0..count {
        let mut row = Vec::with_capacity(dim);
        for _ in 0..dim {
            let bytes = [
                mmap[offset],
                mmap[offset + 1],
                mmap[offset + 2],
                mmap[offset + 3],
            ];
            row.push(f32::from_le_bytes(bytes));
            offset += 4;
        }
        embeddings.push(row);
    }

    Ok((embeddings, labels, dimension))
}

fn read_partition(
    path: &Path,
    row_count: usize,
    dimension: VectorDimension,
) -> Result<Option<Partition>, PersistError> {
    let json = std::fs::read_to_string(path)?;
    let blob: Option<PartitionBlob> =
        serde_json::from_str(&json).map_err(|e| PersistError::Serialization(e.to_string()))?;

    let Some(blob) = blob else {
        return Ok(None);
    };

    if blob.assignments.len() != row_count {
        return Err(PersistError::InvalidFormat(format!(
            "partition has {} assignments for {} catalog rows",
            blob.assignments.len(),
            row_count
        )));
    }
    for centroid in &blob.centroids {
        dimension.validate_vector(centroid)?;
    }

    let n_clusters = blob.centroids.len() as u32;
    let assignments = blob
        .assignments
        .into_iter()
        .map(|id| match ClusterId::new(id) {
            Some(cluster) if cluster.get() <= n_clusters => Ok(cluster),
            _ => Err(PersistError::InvalidFormat(format!(
                "cluster id {id} out of range for {n_clusters} centroids"
            ))),
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Some(Partition {
        centroids: blob.centroids,
        assignments,
    }))
}

fn read_header(mmap: &Mmap) -> Result<(VectorDimension, usize), PersistError> {
    if mmap.len() < HEADER_SIZE {
        return Err(PersistError::InvalidFormat(
            "file too small to contain header".to_string(),
        ));
    }
    if &mmap[0..4] != MAGIC_BYTES {
        return Err(PersistError::InvalidFormat("invalid magic bytes".to_string()));
    }

    let version = read_u32(mmap, 4)?;
    if version != STORAGE_VERSION {
        return Err(PersistError::VersionMismatch {
            expected: STORAGE_VERSION,
            actual: version,
        });
    }

    let dimension = VectorDimension::new(read_u32(mmap, 8)? as usize)?;
    let count = read_u32(mmap, 12)? as usize;
    Ok((dimension, count))
}

fn read_u32(mmap: &Mmap, offset: usize) -> Result<u32, PersistError> {
    let bytes = mmap
        .get(offset..offset + 4)
        .ok_or_else(|| PersistError::InvalidFormat("unexpected end of file".to_string()))?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::store::SearchMode;
    use tempfile::TempDir;

    fn sample_store() -> VectorStore {
        let mut store = VectorStore::from_entries(
            vec![
                vec![1.0, 0.0, 0.0],
                vec![0.9, 0.1, 0.0],
                vec![0.0, 1.0, 0.0],
                vec![0.0, 0.0, 1.0],
            ],
            ["alpha", "beta", "gamma", "delta"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        )
        .unwrap();
        store.build_partition(2).unwrap();
        store
    }

    #[test]
    fn round_trip_preserves_store() {
        let temp = TempDir::new().unwrap();
        let store = sample_store();

        store.save(temp.path(), false).unwrap();
        let loaded = VectorStore::load(temp.path()).unwrap();

        assert_eq!(loaded.labels(), store.labels());
        assert_eq!(loaded.len(), store.len());
        assert_eq!(loaded.cluster_count(), store.cluster_count());
        assert_eq!(loaded, store);

        // Loaded rows keep unit norm.
        for row in &loaded.embeddings {
            let norm: f32 = row.iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn round_trip_without_partition() {
        let temp = TempDir::new().unwrap();
        let store = VectorStore::from_entries(
            vec![vec![1.0, 0.0]],
            vec!["only".to_string()],
        )
        .unwrap();

        store.save(temp.path(), false).unwrap();
        let loaded = VectorStore::load(temp.path()).unwrap();
        assert!(!loaded.has_partition());
        assert_eq!(loaded.labels(), store.labels());
    }

    #[test]
    fn round_trip_reproduces_search_results() {
        let temp = TempDir::new().unwrap();
        let store = sample_store();
        store.save(temp.path(), false).unwrap();
        let loaded = VectorStore::load(temp.path()).unwrap();

        let query = [0.8, 0.2, 0.0];
        for mode in [SearchMode::Exact, SearchMode::Approximate] {
            let before = store.search(&query, 3, mode, 2).unwrap();
            let after = loaded.search(&query, 3, mode, 2).unwrap();
            assert_eq!(before, after);
        }
    }

    #[test]
    fn save_empty_store_fails() {
        let temp = TempDir::new().unwrap();
        let store = VectorStore::new();
        assert!(matches!(
            store.save(temp.path(), false),
            Err(PersistError::NotBuilt)
        ));
    }

    #[test]
    fn save_refuses_overwrite_without_flag() {
        let temp = TempDir::new().unwrap();
        let store = sample_store();

        store.save(temp.path(), false).unwrap();
        assert!(matches!(
            store.save(temp.path(), false),
            Err(PersistError::ArtifactExists { .. })
        ));

        // Explicit overwrite succeeds.
        store.save(temp.path(), true).unwrap();
    }

    #[test]
    fn load_fails_when_artifact_missing() {
        let temp = TempDir::new().unwrap();
        let store = sample_store();
        store.save(temp.path(), false).unwrap();

        std::fs::remove_file(temp.path().join(PARTITION_FILE)).unwrap();
        assert!(matches!(
            VectorStore::load(temp.path()),
            Err(PersistError::ArtifactMissing { .. })
        ));

        // No partial load from an empty directory either.
        let empty = TempDir::new().unwrap();
        assert!(matches!(
            VectorStore::load(empty.path()),
            Err(PersistError::ArtifactMissing { .. })
        ));
    }

    #[test]
    fn load_rejects_corrupt_magic() {
        let temp = TempDir::new().unwrap();
        let store = sample_store();
        store.save(temp.path(), false).unwrap();

        let path = temp.path().join(VECTORS_FILE);
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[0] = b'X';
        std::fs::write(&path, bytes).unwrap();

        assert!(matches!(
            VectorStore::load(temp.path()),
            Err(PersistError::InvalidFormat(_))
        ));
    }

    #[test]
    fn load_rejects_misaligned_partition() {
        let temp = TempDir::new().unwrap();
        let store = sample_store();
        store.save(temp.path(), false).unwrap();

        // Truncate the assignments list.
        let path = temp.path().join(PARTITION_FILE);
        let json = std::fs::read_to_string(&path).unwrap();
        let mut blob: Option<PartitionBlob> = serde_json::from_str(&json).unwrap();
        blob.as_mut().unwrap().assignments.pop();
        std::fs::write(&path, serde_json::to_string(&blob).unwrap()).unwrap();

        assert!(matches!(
            VectorStore::load(temp.path()),
            Err(PersistError::InvalidFormat(_))
        ));
    }
}
