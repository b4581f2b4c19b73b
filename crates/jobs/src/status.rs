//! Progress record of a bulk job.

use chrono::{DateTime, Utc};
use common::JobId;
use serde::{Deserialize, Serialize};
use store::{Entity, Version};

use crate::error::{JobError, Result};

/// The state of a bulk job.
///
/// State transitions:
/// ```text
/// NotStarted ──► Running ──► Completed
///                   │
///                   └──────► Aborted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Status exists but the run has not begun.
    #[default]
    NotStarted,

    /// Orders are being processed.
    Running,

    /// Every order was attempted (terminal state).
    Completed,

    /// The run stopped early (terminal state).
    Aborted,
}

impl JobState {
    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Aborted)
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::NotStarted => "NOT_STARTED",
            JobState::Running => "RUNNING",
            JobState::Completed => "COMPLETED",
            JobState::Aborted => "ABORTED",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Increment reported after one or more orders were attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProgressDelta {
    pub succeeded: u64,
    pub failed: u64,
}

impl ProgressDelta {
    pub fn succeeded(count: u64) -> Self {
        Self {
            succeeded: count,
            failed: 0,
        }
    }

    pub fn failed(count: u64) -> Self {
        Self {
            succeeded: 0,
            failed: count,
        }
    }
}

/// Durable progress of a bulk job, keyed by job id.
///
/// Counters only move forward during a run and `processed + failed` never
/// exceeds `total`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingStatus {
    job_id: JobId,

    #[serde(default)]
    version: Version,

    state: JobState,

    /// Orders handled successfully.
    processed_count: u64,

    failed_count: u64,

    total_count: u64,

    created_at: DateTime<Utc>,

    started_at: Option<DateTime<Utc>>,

    finished_at: Option<DateTime<Utc>>,

    abort_reason: Option<String>,
}

impl Entity for ProcessingStatus {
    type Id = JobId;

    fn entity_type() -> &'static str {
        "ProcessingStatus"
    }

    fn id(&self) -> &JobId {
        &self.job_id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }
}

// Query methods
impl ProcessingStatus {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn processed_count(&self) -> u64 {
        self.processed_count
    }

    pub fn failed_count(&self) -> u64 {
        self.failed_count
    }

    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn abort_reason(&self) -> Option<&str> {
        self.abort_reason.as_deref()
    }

    /// Returns the number of orders not yet attempted.
    pub fn remaining(&self) -> u64 {
        self.total_count
            .saturating_sub(self.processed_count + self.failed_count)
    }

    /// Returns the share of attempted orders, from 0.0 to 100.0.
    pub fn percent_complete(&self) -> f64 {
        if self.total_count == 0 {
            return if self.state == JobState::Completed {
                100.0
            } else {
                0.0
            };
        }
        (self.processed_count + self.failed_count) as f64 * 100.0 / self.total_count as f64
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

// Transitions
impl ProcessingStatus {
    /// Creates a status for a job that has not started.
    pub fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            version: Version::initial(),
            state: JobState::NotStarted,
            processed_count: 0,
            failed_count: 0,
            total_count: 0,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            abort_reason: None,
        }
    }

    /// Starts the run with the number of orders it will attempt.
    pub fn mark_running(&mut self, total: u64) -> Result<()> {
        self.ensure_state(JobState::NotStarted, "start")?;
        self.state = JobState::Running;
        self.total_count = total;
        self.processed_count = 0;
        self.failed_count = 0;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Sets the processed count to an absolute value.
    ///
    /// The count is clamped to the total and never lowered. The total can
    /// grow but never drops below what was already counted.
    pub fn update_progress(&mut self, processed: u64, total: u64) -> Result<()> {
        self.ensure_state(JobState::Running, "update progress")?;
        self.total_count = total.max(self.processed_count + self.failed_count);
        let ceiling = self.total_count - self.failed_count;
        self.processed_count = processed.min(ceiling).max(self.processed_count);
        Ok(())
    }

    /// Adds a delta to the counters, clamped to the remaining orders.
    pub fn record(&mut self, delta: ProgressDelta) -> Result<()> {
        self.ensure_state(JobState::Running, "record progress")?;
        let succeeded = delta.succeeded.min(self.remaining());
        self.processed_count += succeeded;
        let failed = delta.failed.min(self.remaining());
        self.failed_count += failed;
        Ok(())
    }

    pub fn mark_completed(&mut self) -> Result<()> {
        self.ensure_state(JobState::Running, "complete")?;
        self.state = JobState::Completed;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    pub fn mark_aborted(&mut self, reason: impl Into<String>) -> Result<()> {
        self.ensure_state(JobState::Running, "abort")?;
        self.state = JobState::Aborted;
        self.abort_reason = Some(reason.into());
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    fn ensure_state(&self, expected: JobState, action: &'static str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(JobError::InvalidState {
                job_id: self.job_id.clone(),
                state: self.state,
                action,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running(total: u64) -> ProcessingStatus {
        let mut status = ProcessingStatus::new(JobId::new("job-1"));
        status.mark_running(total).unwrap();
        status
    }

    #[test]
    fn test_new_status_is_not_started() {
        let status = ProcessingStatus::new(JobId::new("job-1"));
        assert_eq!(status.state(), JobState::NotStarted);
        assert_eq!(status.processed_count(), 0);
        assert!(status.started_at().is_none());
        assert!(!status.is_terminal());
    }

    #[test]
    fn test_mark_running_only_once() {
        let mut status = running(10);
        assert_eq!(status.total_count(), 10);
        assert!(status.started_at().is_some());

        let result = status.mark_running(5);
        assert!(matches!(
            result,
            Err(JobError::InvalidState {
                state: JobState::Running,
                action: "start",
                ..
            })
        ));
        assert_eq!(status.total_count(), 10);
    }

    #[test]
    fn test_progress_requires_running() {
        let mut status = ProcessingStatus::new(JobId::new("job-1"));
        assert!(status.update_progress(1, 10).is_err());
        assert!(status.record(ProgressDelta::succeeded(1)).is_err());
        assert!(status.mark_completed().is_err());
    }

    #[test]
    fn test_update_progress_clamps_and_never_lowers() {
        let mut status = running(10);

        status.update_progress(4, 10).unwrap();
        assert_eq!(status.processed_count(), 4);

        status.update_progress(2, 10).unwrap();
        assert_eq!(status.processed_count(), 4);

        status.update_progress(25, 10).unwrap();
        assert_eq!(status.processed_count(), 10);
    }

    #[test]
    fn test_record_accumulates() {
        let mut status = running(5);
        status.record(ProgressDelta::succeeded(1)).unwrap();
        status.record(ProgressDelta::failed(1)).unwrap();
        status.record(ProgressDelta::succeeded(2)).unwrap();

        assert_eq!(status.processed_count(), 3);
        assert_eq!(status.failed_count(), 1);
        assert_eq!(status.remaining(), 1);
        assert!((status.percent_complete() - 80.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_record_never_exceeds_total() {
        let mut status = running(3);
        status
            .record(ProgressDelta {
                succeeded: 2,
                failed: 5,
            })
            .unwrap();

        assert_eq!(status.processed_count(), 2);
        assert_eq!(status.failed_count(), 1);
        assert_eq!(status.remaining(), 0);
    }

    #[test]
    fn test_no_regression_from_terminal() {
        let mut status = running(1);
        status.record(ProgressDelta::succeeded(1)).unwrap();
        status.mark_completed().unwrap();
        assert!(status.finished_at().is_some());

        assert!(status.mark_aborted("late").is_err());
        assert!(status.record(ProgressDelta::succeeded(1)).is_err());
        assert!(status.mark_running(1).is_err());
        assert_eq!(status.state(), JobState::Completed);
    }

    #[test]
    fn test_mark_aborted_keeps_reason() {
        let mut status = running(10);
        status.mark_aborted("cancelled").unwrap();
        assert_eq!(status.state(), JobState::Aborted);
        assert_eq!(status.abort_reason(), Some("cancelled"));
        assert!(status.is_terminal());
    }

    #[test]
    fn test_percent_complete_for_empty_job() {
        let mut status = running(0);
        assert_eq!(status.percent_complete(), 0.0);
        status.mark_completed().unwrap();
        assert_eq!(status.percent_complete(), 100.0);
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_string(&JobState::NotStarted).unwrap();
        assert_eq!(json, "\"NOT_STARTED\"");
    }
}
