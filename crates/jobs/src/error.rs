//! Job error types.

use common::JobId;
use domain::DomainError;
use store::StoreError;
use thiserror::Error;

use crate::coordinator::ShipmentFailure;
use crate::status::JobState;

/// Errors that can occur during bulk job operations.
#[derive(Debug, Error)]
pub enum JobError {
    /// Request rejected before any status was written.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// No status exists for the job.
    #[error("Job not found: {job_id}")]
    JobNotFound { job_id: JobId },

    /// The job is not in a state that allows the requested change.
    #[error("Invalid job state: cannot {action} job {job_id} in {state} state")]
    InvalidState {
        job_id: JobId,
        state: JobState,
        action: &'static str,
    },

    /// Progress kept conflicting with other writers.
    #[error("Progress commit for job {job_id} conflicted {attempts} times")]
    RetriesExhausted { job_id: JobId, attempts: u32 },

    /// The progress recorder task has stopped.
    #[error("Progress recorder is not running")]
    RecorderUnavailable,

    /// The job stopped after it started because its progress or orders
    /// could not be read or written. The status is aborted, immediately or
    /// by a background retry once the store recovers.
    #[error("Job {job_id} interrupted after {succeeded} shipped and {} failed: {source}", .failures.len())]
    Interrupted {
        job_id: JobId,
        succeeded: u64,
        failures: Vec<ShipmentFailure>,
        #[source]
        source: Box<JobError>,
    },

    /// Domain error.
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// Store error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Convenience type alias for job results.
pub type Result<T> = std::result::Result<T, JobError>;
