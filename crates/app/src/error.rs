//! Application-level error type.

use domain::DomainError;
use jobs::JobError;
use thiserror::Error;

/// Errors surfaced by the binary.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Job(#[from] JobError),

    /// The background job task panicked or was cancelled.
    #[error("Job task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Failed to install metrics recorder: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    #[error("Failed to render status: {0}")]
    Render(#[from] serde_json::Error),
}
