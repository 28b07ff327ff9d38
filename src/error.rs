//! Crate-wide error types.
//!
//! Each component of the pipeline owns a small leaf error enum; `PipelineError`
//! wraps them so callers at the facade level have one type to match on, the way
//! `EnterpriseError` wraps `WorkflowError`/`StepError` in the teacher's enterprise
//! module.

use thiserror::Error;

use crate::cache::CacheError;
use crate::provider::ProviderError;
use crate::queue::QueueError;

/// Top-level pipeline error.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A cache tier operation failed in a way that could not be contained.
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    /// The work queue rejected or failed to process a job.
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// The external provider returned an error or could not be reached.
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// A submitted request failed validation before it reached the queue.
    #[error("validation error: {0}")]
    Validation(String),

    /// Generic wrapped error for boundaries that only need an opaque cause.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;
