//! Repository Module
//!
//! Durable storage layer for the orchestrator.
//! Job documents and artifacts live in one directory per job; the two
//! lookup indices sit beside the jobs directory.

pub mod index;
pub mod job;

use thiserror::Error;

pub use index::JobIndex;
pub use job::JobRepository;

/// Repository error type
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid job id: {0}")]
    InvalidJobId(String),
}

pub type Result<T> = std::result::Result<T, RepositoryError>;
