//! Layered configuration for the matcher.
//!
//! Settings merge three layers, later layers winning:
//! - built-in defaults
//! - `namematch.toml` in the working directory
//! - environment variables prefixed with `NAMEMATCH_`, with `__` separating
//!   nested levels (`NAMEMATCH_CACHE__SIZE=500` sets `cache.size`)

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::preprocess::DEFAULT_STOPWORDS;

/// Configuration file name looked up in the working directory.
pub const CONFIG_FILE: &str = "namematch.toml";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Embedding model settings
    #[serde(default)]
    pub model: ModelConfig,

    /// Embedding cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Name preprocessing settings
    #[serde(default)]
    pub preprocess: PreprocessConfig,

    /// Search defaults
    #[serde(default)]
    pub search: SearchConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ModelConfig {
    /// Model identifier for the embedding producer
    #[serde(default = "default_model_name")]
    pub name: String,

    /// Directory where downloaded model files are cached
    #[serde(default = "default_model_cache_dir")]
    pub cache_dir: PathBuf,

    /// Show a progress bar during first-time model download
    #[serde(default = "default_false")]
    pub show_download_progress: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CacheConfig {
    /// Whether embeddings are cached between calls
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum number of cached embeddings
    #[serde(default = "default_cache_size")]
    pub size: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PreprocessConfig {
    /// Stopwords removed by the default preprocessing pipeline
    #[serde(default = "default_stopwords")]
    pub stopwords: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SearchConfig {
    /// Minimum similarity score for a match
    #[serde(default = "default_threshold")]
    pub threshold: f32,

    /// Number of top matches returned per query
    #[serde(default = "default_k")]
    pub k: usize,

    /// Use cluster-probing approximate search instead of exhaustive search
    #[serde(default = "default_false")]
    pub approximate: bool,

    /// Queries per embedding batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Parallel worker count for batch matching; 0 uses all cores
    #[serde(default = "default_jobs")]
    pub jobs: usize,

    /// Number of nearest clusters probed in approximate mode
    #[serde(default = "default_n_probe")]
    pub n_probe_clusters: usize,
}

// Default value functions
fn default_version() -> u32 {
    1
}
fn default_model_name() -> String {
    "AllMiniLML6V2".to_string()
}
fn default_model_cache_dir() -> PathBuf {
    PathBuf::from(".namematch/models")
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_cache_size() -> usize {
    1000
}
fn default_stopwords() -> Vec<String> {
    DEFAULT_STOPWORDS.iter().map(|s| s.to_string()).collect()
}
fn default_threshold() -> f32 {
    0.9
}
fn default_k() -> usize {
    5
}
fn default_batch_size() -> usize {
    32
}
fn default_jobs() -> usize {
    1
}
fn default_n_probe() -> usize {
    1
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model_name(),
            cache_dir: default_model_cache_dir(),
            show_download_progress: false,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            size: default_cache_size(),
        }
    }
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            stopwords: default_stopwords(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            k: default_k(),
            approximate: false,
            batch_size: default_batch_size(),
            jobs: default_jobs(),
            n_probe_clusters: default_n_probe(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            model: ModelConfig::default(),
            cache: CacheConfig::default(),
            preprocess: PreprocessConfig::default(),
            search: SearchConfig::default(),
        }
    }
}

impl Settings {
    /// Loads settings from defaults, `namematch.toml`, and `NAMEMATCH_`
    /// environment overrides.
    pub fn load() -> Result<Self, figment::Error> {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed("NAMEMATCH_").split("__"))
            .extract()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn built_in_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.search.threshold, 0.9);
        assert_eq!(settings.search.k, 5);
        assert_eq!(settings.search.batch_size, 32);
        assert_eq!(settings.search.jobs, 1);
        assert_eq!(settings.search.n_probe_clusters, 1);
        assert_eq!(settings.cache.size, 1000);
        assert!(settings.cache.enabled);
        assert_eq!(settings.preprocess.stopwords.len(), 7);
    }

    #[test]
    fn settings_round_trip_through_serde() {
        let settings = Settings::default();
        let json = serde_json::to_string(&settings).unwrap();
        let back: Settings = serde_json::from_str(&json).unwrap();
        assert_eq!(back.search.k, settings.search.k);
        assert_eq!(back.model.name, settings.model.name);
    }
}
