//! Error taxonomy for the tracking engine
//!
//! Validation rejects a request before anything is persisted; NotFound maps
//! to a 404-equivalent; Storage covers unexpected failures mid-flow and is
//! surfaced to callers as a generic processing error.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackError {
    /// Bad input. Every violated rule is listed, not just the first.
    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, TrackError>;
