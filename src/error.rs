//! Orchestrator-level error types.
//!
//! The matcher has no recovery strategy for index or persistence failures,
//! so it wraps them transparently and propagates them unchanged.

use crate::vector::{PersistError, VectorError};
use thiserror::Error;

/// Errors surfaced by [`crate::matcher::NameMatcher`].
#[derive(Error, Debug)]
pub enum MatchError {
    #[error("No index available\nSuggestion: Call build_index or load_index first")]
    NoIndex,

    #[error(transparent)]
    Vector(#[from] VectorError),

    #[error(transparent)]
    Persist(#[from] PersistError),

    #[error("Failed to build worker pool: {0}\nSuggestion: Check the configured job count")]
    PoolBuild(String),

    #[error("Invalid configuration: {reason}")]
    Config { reason: String },
}

impl From<figment::Error> for MatchError {
    fn from(err: figment::Error) -> Self {
        Self::Config {
            reason: err.to_string(),
        }
    }
}

/// Result type alias for matcher operations.
pub type MatchResult<T> = Result<T, MatchError>;
