//! Embedding-based company name matching.
//!
//! `namematch` resolves messy, inconsistently formatted company names
//! against a catalog by comparing text embeddings instead of characters:
//! "Acme Corp" and "ACME, Inc." land close together in embedding space
//! even though their strings barely overlap.
//!
//! The pipeline: names are normalized by a [`Preprocessor`], embedded by
//! an [`EmbeddingProducer`] (backed by fastembed in production, anything
//! deterministic in tests) through a bounded [`EmbeddingCache`], and
//! searched against an in-memory [`VectorStore`] that supports exact
//! scan and k-means partitioned approximate search. [`NameMatcher`] ties
//! it all together and adds durable persistence and parallel batch
//! matching.
//!
//! ```no_run
//! use namematch::{MatchOptions, NameMatcher, Settings};
//!
//! # fn main() -> Result<(), namematch::MatchError> {
//! let settings = Settings::load()?;
//! let mut matcher = NameMatcher::from_settings(&settings)?;
//!
//! matcher.build_index(&["Acme Corp", "Globex Corporation"], 2, None)?;
//! let matches = matcher.find_matches("ACME, Inc.", &MatchOptions::default())?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod embedding;
pub mod error;
pub mod matcher;
pub mod preprocess;
pub mod vector;

pub use cache::EmbeddingCache;
pub use config::Settings;
pub use embedding::{EmbeddingProducer, FastEmbedProducer};
pub use error::{MatchError, MatchResult};
pub use matcher::{MatchOptions, NameMatcher};
pub use preprocess::{DEFAULT_STOPWORDS, Preprocessor};
pub use vector::{Score, SearchMode, VectorStore, cosine_similarity};
