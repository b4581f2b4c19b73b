//! Progress recorder running as its own task.
//!
//! Bulk jobs never write their [`ProcessingStatus`] directly. They send
//! messages to a [`ProgressRecorder`] task that owns its own store handle
//! and commits every change as a separate unit of work before replying.
//! A committed progress report is visible to readers immediately and is
//! unaffected by whatever happens to the job afterwards.

use std::time::Duration;

use common::JobId;
use metrics::counter;
use store::{Store, StoreExt};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::error::{JobError, Result};
use crate::status::{ProcessingStatus, ProgressDelta};

/// Backoff applied when a progress commit hits a version conflict.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of commit attempts per message.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Returns the delay to wait after the given failed attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let nanos = self.base_delay.as_nanos() as f64 * self.backoff_multiplier.powi(exponent);
        Duration::from_nanos(nanos.min(self.max_delay.as_nanos() as f64) as u64)
    }
}

type Response<T> = oneshot::Sender<Result<T>>;

#[derive(Debug)]
enum ProgressCommand {
    Start {
        job_id: JobId,
        total: u64,
        respond_to: Response<ProcessingStatus>,
    },
    Record {
        job_id: JobId,
        delta: ProgressDelta,
        respond_to: Response<ProcessingStatus>,
    },
    Finish {
        job_id: JobId,
        respond_to: Response<ProcessingStatus>,
    },
    Abort {
        job_id: JobId,
        delta: ProgressDelta,
        reason: String,
        respond_to: Response<ProcessingStatus>,
    },
}

/// Actor that commits progress changes.
pub struct ProgressRecorder<S> {
    receiver: mpsc::Receiver<ProgressCommand>,
    store: S,
    retry: RetryConfig,
}

impl<S: Store + 'static> ProgressRecorder<S> {
    /// Creates the actor and its handle. The actor does nothing until
    /// [`run`](Self::run) is driven.
    pub fn new(store: S, retry: RetryConfig, capacity: usize) -> (Self, ProgressRecorderHandle) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let recorder = Self {
            receiver,
            store,
            retry,
        };
        (recorder, ProgressRecorderHandle { sender })
    }

    /// Creates the actor and runs it on a background task.
    ///
    /// The task ends once every handle has been dropped.
    pub fn spawn(store: S, retry: RetryConfig, capacity: usize) -> ProgressRecorderHandle {
        let (recorder, handle) = Self::new(store, retry, capacity);
        tokio::spawn(recorder.run());
        handle
    }

    /// Processes messages one at a time until the channel closes.
    pub async fn run(mut self) {
        while let Some(command) = self.receiver.recv().await {
            match command {
                ProgressCommand::Start {
                    job_id,
                    total,
                    respond_to,
                } => {
                    let result = self
                        .apply(&job_id, true, |status| status.mark_running(total))
                        .await;
                    let _ = respond_to.send(result);
                }
                ProgressCommand::Record {
                    job_id,
                    delta,
                    respond_to,
                } => {
                    let result = self
                        .apply(&job_id, false, |status| status.record(delta))
                        .await;
                    let _ = respond_to.send(result);
                }
                ProgressCommand::Finish { job_id, respond_to } => {
                    let result = self
                        .apply(&job_id, false, |status| status.mark_completed())
                        .await;
                    let _ = respond_to.send(result);
                }
                ProgressCommand::Abort {
                    job_id,
                    delta,
                    reason,
                    respond_to,
                } => {
                    let result = self
                        .apply(&job_id, false, |status| {
                            status.record(delta)?;
                            status.mark_aborted(reason.clone())
                        })
                        .await;
                    let _ = respond_to.send(result);
                }
            }
        }
        debug!("progress recorder stopped");
    }

    /// Loads the latest status, applies `change` and saves it with a
    /// version check, re-reading and retrying on conflict.
    async fn apply<F>(&self, job_id: &JobId, create: bool, change: F) -> Result<ProcessingStatus>
    where
        F: Fn(&mut ProcessingStatus) -> Result<()>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;

            let mut status = match self.store.find_by_id::<ProcessingStatus>(job_id).await? {
                Some(status) => status,
                None if create => ProcessingStatus::new(job_id.clone()),
                None => {
                    return Err(JobError::JobNotFound {
                        job_id: job_id.clone(),
                    });
                }
            };
            change(&mut status)?;

            match self.store.save(status).await {
                Ok(saved) => return Ok(saved),
                Err(e) if e.is_conflict() => {
                    counter!("progress_commit_conflicts_total").increment(1);
                    if attempt >= self.retry.max_attempts {
                        return Err(JobError::RetriesExhausted {
                            job_id: job_id.clone(),
                            attempts: attempt,
                        });
                    }
                    let delay = self.retry.delay_for(attempt);
                    debug!(%job_id, attempt, ?delay, "progress commit conflicted, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Cloneable client of a [`ProgressRecorder`].
///
/// Every method returns only after the change has been committed.
#[derive(Debug, Clone)]
pub struct ProgressRecorderHandle {
    sender: mpsc::Sender<ProgressCommand>,
}

impl ProgressRecorderHandle {
    /// Fetches or creates the job's status and marks it running.
    pub async fn start(&self, job_id: &JobId, total: u64) -> Result<ProcessingStatus> {
        self.request(|respond_to| ProgressCommand::Start {
            job_id: job_id.clone(),
            total,
            respond_to,
        })
        .await
    }

    pub async fn record(&self, job_id: &JobId, delta: ProgressDelta) -> Result<ProcessingStatus> {
        self.request(|respond_to| ProgressCommand::Record {
            job_id: job_id.clone(),
            delta,
            respond_to,
        })
        .await
    }

    /// Marks the job completed.
    pub async fn finish(&self, job_id: &JobId) -> Result<ProcessingStatus> {
        self.request(|respond_to| ProgressCommand::Finish {
            job_id: job_id.clone(),
            respond_to,
        })
        .await
    }

    /// Marks the job aborted with a reason.
    pub async fn abort(&self, job_id: &JobId, reason: impl Into<String>) -> Result<ProcessingStatus> {
        self.abort_with_progress(job_id, ProgressDelta::default(), reason)
            .await
    }

    /// Adds a final, not yet recorded delta and marks the job aborted in a
    /// single commit.
    pub async fn abort_with_progress(
        &self,
        job_id: &JobId,
        delta: ProgressDelta,
        reason: impl Into<String>,
    ) -> Result<ProcessingStatus> {
        let reason = reason.into();
        self.request(|respond_to| ProgressCommand::Abort {
            job_id: job_id.clone(),
            delta,
            reason,
            respond_to,
        })
        .await
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Response<T>) -> ProgressCommand,
    ) -> Result<T> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(build(respond_to))
            .await
            .map_err(|_| JobError::RecorderUnavailable)?;
        response.await.map_err(|_| JobError::RecorderUnavailable)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::JobState;
    use store::{Entity, InMemoryStore, Version};

    fn spawn(store: &InMemoryStore) -> ProgressRecorderHandle {
        ProgressRecorder::spawn(store.clone(), RetryConfig::default(), 8)
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let retry = RetryConfig {
            max_attempts: 10,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            backoff_multiplier: 2.0,
        };
        assert_eq!(retry.delay_for(1), Duration::from_millis(10));
        assert_eq!(retry.delay_for(2), Duration::from_millis(20));
        assert_eq!(retry.delay_for(3), Duration::from_millis(40));
        assert_eq!(retry.delay_for(4), Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_each_message_is_committed_before_reply() {
        let store = InMemoryStore::new();
        let recorder = spawn(&store);
        let job_id = JobId::new("job-1");

        recorder.start(&job_id, 3).await.unwrap();
        let stored: ProcessingStatus = store.find_by_id(&job_id).await.unwrap().unwrap();
        assert_eq!(stored.state(), JobState::Running);
        assert_eq!(stored.total_count(), 3);

        recorder
            .record(&job_id, ProgressDelta::succeeded(1))
            .await
            .unwrap();
        let stored: ProcessingStatus = store.find_by_id(&job_id).await.unwrap().unwrap();
        assert_eq!(stored.processed_count(), 1);
        assert_eq!(stored.version(), Version::new(2));
    }

    #[tokio::test]
    async fn test_record_for_unknown_job() {
        let store = InMemoryStore::new();
        let recorder = spawn(&store);

        let result = recorder
            .record(&JobId::new("missing"), ProgressDelta::succeeded(1))
            .await;
        assert!(matches!(result, Err(JobError::JobNotFound { .. })));
        assert_eq!(store.record_count("ProcessingStatus").await, 0);
    }

    #[tokio::test]
    async fn test_invalid_transition_is_not_committed() {
        let store = InMemoryStore::new();
        let recorder = spawn(&store);
        let job_id = JobId::new("job-1");

        recorder.start(&job_id, 1).await.unwrap();
        recorder.finish(&job_id).await.unwrap();

        let result = recorder.start(&job_id, 1).await;
        assert!(matches!(result, Err(JobError::InvalidState { .. })));

        let stored: ProcessingStatus = store.find_by_id(&job_id).await.unwrap().unwrap();
        assert_eq!(stored.state(), JobState::Completed);
    }

    #[tokio::test]
    async fn test_abort_commits_pending_delta() {
        let store = InMemoryStore::new();
        let recorder = spawn(&store);
        let job_id = JobId::new("job-1");

        recorder.start(&job_id, 4).await.unwrap();
        recorder
            .record(&job_id, ProgressDelta::succeeded(1))
            .await
            .unwrap();
        let status = recorder
            .abort_with_progress(&job_id, ProgressDelta::failed(1), "store outage")
            .await
            .unwrap();

        assert_eq!(status.state(), JobState::Aborted);
        assert_eq!(status.processed_count(), 1);
        assert_eq!(status.failed_count(), 1);
        assert_eq!(status.abort_reason(), Some("store outage"));
        assert_eq!(status.version(), Version::new(3));
    }

    #[tokio::test]
    async fn test_store_failure_is_reported() {
        let store = InMemoryStore::new();
        let recorder = spawn(&store);
        store.set_unavailable(true);

        let result = recorder.start(&JobId::new("job-1"), 1).await;
        assert!(matches!(result, Err(JobError::Store(_))));
    }

    #[tokio::test]
    async fn test_stopped_recorder() {
        let store = InMemoryStore::new();
        let (recorder, handle) = ProgressRecorder::new(store, RetryConfig::default(), 1);
        drop(recorder);

        let result = handle.start(&JobId::new("job-1"), 1).await;
        assert!(matches!(result, Err(JobError::RecorderUnavailable)));
    }
}
