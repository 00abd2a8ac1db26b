//! Service Module
//!
//! Business logic layer for the orchestrator.
//! The job store owns all in-memory state; pipelines, progress estimators
//! and metadata backfill are implemented on top of it.

pub mod metadata;
pub mod pipeline;
pub mod progress;
pub mod store;

use clipcheck_core::domain::job::JobStatus;
use thiserror::Error;

use crate::repository::RepositoryError;

pub use store::{JobStore, StoreSettings};

/// Job store error type
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Job {0} not found")]
    NotFound(String),

    #[error("Job {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Storage error: {0}")]
    Repository(#[from] RepositoryError),
}

/// Pipeline stage error type
///
/// The display text of every variant is what ends up in the job's `error`.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{0}")]
    Download(String),

    #[error("{0}")]
    Transcription(String),

    #[error("{0}")]
    FactCheck(String),

    #[error("{0}")]
    InvalidInput(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<clipcheck_llm::ClientError> for PipelineError {
    fn from(err: clipcheck_llm::ClientError) -> Self {
        PipelineError::FactCheck(err.to_string())
    }
}

impl From<RepositoryError> for PipelineError {
    fn from(err: RepositoryError) -> Self {
        PipelineError::Store(StoreError::Repository(err))
    }
}

#[cfg(test)]
pub(crate) mod fakes;
