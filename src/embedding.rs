//! Embedding producer boundary.
//!
//! The matcher treats embedding generation as a black box behind
//! [`EmbeddingProducer`]: a batch of preprocessed strings in, one
//! fixed-dimension vector per string out, same order. The default
//! implementation wraps a fastembed text embedding model.

use crate::vector::{VectorDimension, VectorError};
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use parking_lot::Mutex;
use std::path::Path;

/// Produces embedding vectors from preprocessed text.
///
/// Implementations must be thread-safe: batch matching calls
/// `embed_batch` from multiple worker threads concurrently.
pub trait EmbeddingProducer: Send + Sync {
    /// Generates one embedding per input text, in input order.
    ///
    /// Every returned vector has the same dimension for the lifetime of the
    /// producer instance.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError>;

    /// Dimension of produced embeddings.
    fn dimension(&self) -> VectorDimension;
}

/// fastembed-backed producer.
///
/// The model handle is wrapped in a mutex because fastembed's embed call
/// takes `&mut self`; worker threads serialize on it while the surrounding
/// search work stays parallel.
pub struct FastEmbedProducer {
    model: Mutex<TextEmbedding>,
    dimension: VectorDimension,
}

impl FastEmbedProducer {
    /// Initializes a fastembed model, downloading it on first use.
    ///
    /// The dimension is discovered by embedding a probe string, so it is
    /// correct for whatever model is configured.
    pub fn new(
        model: EmbeddingModel,
        cache_dir: &Path,
        show_download_progress: bool,
    ) -> Result<Self, VectorError> {
        let mut text_model = TextEmbedding::try_new(
            InitOptions::new(model)
                .with_cache_dir(cache_dir.to_path_buf())
                .with_show_download_progress(show_download_progress),
        )
        .map_err(|e| {
            VectorError::EmbeddingFailed(format!(
                "Failed to initialize embedding model: {e}. Ensure you have internet connection for first-time model download"
            ))
        })?;

        let probe = text_model
            .embed(vec!["probe"], None)
            .map_err(|e| VectorError::EmbeddingFailed(e.to_string()))?;
        let dimension = probe
            .first()
            .map(|v| v.len())
            .ok_or_else(|| {
                VectorError::EmbeddingFailed("model returned no probe embedding".to_string())
            })?;

        Ok(Self {
            model: Mutex::new(text_model),
            dimension: VectorDimension::new(dimension)?,
        })
    }
}

impl EmbeddingProducer for FastEmbedProducer {
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let owned: Vec<String> = texts.iter().map(|&s| s.to_string()).collect();
        let embeddings = self
            .model
            .lock()
            .embed(owned, None)
            .map_err(|e| VectorError::EmbeddingFailed(format!("Failed to generate embeddings: {e}")))?;

        for embedding in &embeddings {
            self.dimension.validate_vector(embedding)?;
        }

        Ok(embeddings)
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }
}

impl std::fmt::Debug for FastEmbedProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedProducer")
            .field("model", &"<TextEmbedding>")
            .field("dimension", &self.dimension)
            .finish()
    }
}
