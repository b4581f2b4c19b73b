//! Bulk shipment coordinator.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{JobId, OrderId};
use domain::{DomainError, ErrorKind, Order, OrderService};
use metrics::{counter, histogram};
use store::{Entity, Store, StoreExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{JobError, Result};
use crate::recorder::{ProgressRecorderHandle, RetryConfig};
use crate::shipping::{ShippingError, ShippingService};
use crate::status::{ProcessingStatus, ProgressDelta};

/// When to stop a job that keeps failing.
///
/// The default never aborts.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FailureThreshold {
    /// Abort once more than this many orders have failed.
    pub max_failures: Option<u64>,

    /// Abort once the failed share of attempted orders exceeds this ratio.
    pub max_failure_ratio: Option<f64>,

    /// Attempts required before `max_failure_ratio` is checked.
    pub min_sample: u64,
}

impl FailureThreshold {
    /// Returns true if the job should stop after `attempted` orders of which
    /// `failed` failed.
    pub fn is_exceeded(&self, attempted: u64, failed: u64) -> bool {
        if let Some(max) = self.max_failures
            && failed > max
        {
            return true;
        }
        if let Some(ratio) = self.max_failure_ratio
            && attempted > 0
            && attempted >= self.min_sample
        {
            return failed as f64 / attempted as f64 > ratio;
        }
        false
    }
}

/// Classification of a per-order failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    NotFound,
    InvalidState,
    Shipping,
    Conflict,
    Persistence,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::NotFound => "not_found",
            FailureKind::InvalidState => "invalid_state",
            FailureKind::Shipping => "shipping",
            FailureKind::Conflict => "conflict",
            FailureKind::Persistence => "persistence",
        }
    }

    fn from_domain(error: &DomainError) -> Self {
        match error.kind() {
            ErrorKind::NotFound => FailureKind::NotFound,
            ErrorKind::Conflict => FailureKind::Conflict,
            ErrorKind::Persistence => FailureKind::Persistence,
            ErrorKind::InvalidInput | ErrorKind::InvalidState | ErrorKind::InsufficientStock => {
                FailureKind::InvalidState
            }
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One order that could not be shipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShipmentFailure {
    pub order_id: OrderId,
    pub kind: FailureKind,
    pub reason: String,
}

impl ShipmentFailure {
    fn new(order_id: OrderId, kind: FailureKind, reason: impl ToString) -> Self {
        Self {
            order_id,
            kind,
            reason: reason.to_string(),
        }
    }
}

/// How a job run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Every order was attempted.
    Completed,
    /// Stopped by the failure threshold.
    ThresholdExceeded,
    /// Stopped by the cancel signal.
    Cancelled,
}

impl JobOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobOutcome::Completed => "completed",
            JobOutcome::ThresholdExceeded => "threshold_exceeded",
            JobOutcome::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Summary of a finished job run.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub job_id: JobId,
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub outcome: JobOutcome,
    /// Failures in the order they happened.
    pub failures: Vec<ShipmentFailure>,
    /// Final committed status.
    pub status: ProcessingStatus,
}

impl JobReport {
    /// Returns the number of orders never attempted.
    pub fn skipped(&self) -> u64 {
        self.total - self.succeeded - self.failed
    }
}

fn default_finalize_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 20,
        base_delay: Duration::from_millis(50),
        max_delay: Duration::from_secs(5),
        backoff_multiplier: 2.0,
    }
}

/// Terminal transition applied when a run ends.
#[derive(Debug, Clone)]
enum Finalization {
    Complete,
    Abort { delta: ProgressDelta, reason: String },
}

impl Finalization {
    fn for_outcome(outcome: JobOutcome, succeeded: u64, failed: u64) -> Self {
        match outcome {
            JobOutcome::Completed => Finalization::Complete,
            JobOutcome::ThresholdExceeded => Finalization::Abort {
                delta: ProgressDelta::default(),
                reason: format!(
                    "failure threshold exceeded: {failed} of {} orders failed",
                    succeeded + failed
                ),
            },
            JobOutcome::Cancelled => Finalization::Abort {
                delta: ProgressDelta::default(),
                reason: "cancelled".to_string(),
            },
        }
    }

    async fn apply(
        &self,
        recorder: &ProgressRecorderHandle,
        job_id: &JobId,
    ) -> Result<ProcessingStatus> {
        match self {
            Finalization::Complete => recorder.finish(job_id).await,
            Finalization::Abort { delta, reason } => {
                recorder
                    .abort_with_progress(job_id, *delta, reason.clone())
                    .await
            }
        }
    }
}

/// Progress of one run, kept in memory alongside the recorded status.
struct JobRun {
    succeeded: u64,
    failures: Vec<ShipmentFailure>,
    outcome: JobOutcome,
    /// Error that stopped the run and the delta it left uncommitted.
    interruption: Option<(JobError, ProgressDelta)>,
}

/// Ships batches of orders while reporting progress.
///
/// Each order is shipped and saved as its own unit of work, so a failure
/// never undoes earlier shipments. Progress goes through a
/// [`ProgressRecorderHandle`] after every order and is committed
/// independently of the job.
pub struct BulkShipmentCoordinator<S, Sh>
where
    S: Store,
    Sh: ShippingService,
{
    store: S,
    order_service: OrderService<S>,
    shipping: Sh,
    recorder: ProgressRecorderHandle,
    threshold: FailureThreshold,
    finalize_retry: RetryConfig,
}

impl<S, Sh> BulkShipmentCoordinator<S, Sh>
where
    S: Store + Clone + 'static,
    Sh: ShippingService + 'static,
{
    /// Creates a new coordinator.
    pub fn new(store: S, shipping: Sh, recorder: ProgressRecorderHandle) -> Self {
        let order_service = OrderService::new(store.clone());
        Self {
            store,
            order_service,
            shipping,
            recorder,
            threshold: FailureThreshold::default(),
            finalize_retry: default_finalize_retry(),
        }
    }

    /// Sets the failure threshold.
    pub fn with_threshold(mut self, threshold: FailureThreshold) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn threshold(&self) -> &FailureThreshold {
        &self.threshold
    }

    /// Sets the backoff used to finalize a job whose terminal state could
    /// not be committed.
    pub fn with_finalize_retry(mut self, retry: RetryConfig) -> Self {
        self.finalize_retry = retry;
        self
    }

    /// Ships every order in the batch.
    ///
    /// Per-order failures are counted, logged and returned in the report,
    /// never propagated. An error is returned only when the job itself
    /// cannot run or its progress cannot be recorded.
    pub async fn bulk_ship_orders(
        &self,
        job_id: impl Into<JobId>,
        order_ids: Option<Vec<OrderId>>,
    ) -> Result<JobReport> {
        let (_cancel_tx, cancel) = watch::channel(false);
        self.bulk_ship_orders_with_cancel(job_id, order_ids, cancel)
            .await
    }

    /// Like [`bulk_ship_orders`](Self::bulk_ship_orders), stopping between
    /// orders once `cancel` becomes true.
    ///
    /// A started job always ends in a terminal state. If orders or progress
    /// cannot be read or committed partway through, the job is aborted
    /// together with the progress not yet recorded and
    /// [`JobError::Interrupted`] is returned. When the abort itself cannot
    /// be committed it is retried on a background task.
    #[tracing::instrument(
        skip(self, job_id, order_ids, cancel),
        fields(job_id = tracing::field::Empty)
    )]
    pub async fn bulk_ship_orders_with_cancel(
        &self,
        job_id: impl Into<JobId>,
        order_ids: Option<Vec<OrderId>>,
        cancel: watch::Receiver<bool>,
    ) -> Result<JobReport> {
        let job_id = job_id.into();
        tracing::Span::current().record("job_id", tracing::field::display(&job_id));
        if job_id.is_blank() {
            return Err(JobError::InvalidInput(
                "job id must not be blank".to_string(),
            ));
        }

        let order_ids = order_ids.unwrap_or_default();
        let total = order_ids.len() as u64;
        let started = Instant::now();

        self.recorder.start(&job_id, total).await?;
        info!(%job_id, total, "bulk shipment started");

        let mut run = self.run(&job_id, &order_ids, &cancel).await;
        let failed = run.failures.len() as u64;

        let interruption = run.interruption.take();
        let finalization = match &interruption {
            None => Finalization::for_outcome(run.outcome, run.succeeded, failed),
            Some((e, pending)) => {
                warn!(%job_id, error = %e, "bulk shipment interrupted");
                Finalization::Abort {
                    delta: *pending,
                    reason: format!("interrupted: {e}"),
                }
            }
        };

        let finalized = finalization.apply(&self.recorder, &job_id).await;
        if let Err(e) = &finalized {
            warn!(%job_id, error = %e, "failed to finalize job, retrying in background");
            self.spawn_finalizer(job_id.clone(), finalization);
        }

        let result = match (interruption, finalized) {
            (None, Ok(status)) => Ok(status),
            (Some((source, _)), _) | (None, Err(source)) => Err(source),
        };

        let outcome = match &result {
            Ok(_) => run.outcome.as_str(),
            Err(_) => "interrupted",
        };
        counter!("bulk_jobs_total", "outcome" => outcome).increment(1);
        histogram!("bulk_job_duration_seconds").record(started.elapsed().as_secs_f64());

        match result {
            Ok(status) => {
                info!(
                    %job_id,
                    outcome = %run.outcome,
                    succeeded = run.succeeded,
                    failed,
                    "bulk shipment finished"
                );
                Ok(JobReport {
                    job_id,
                    total,
                    succeeded: run.succeeded,
                    failed,
                    outcome: run.outcome,
                    failures: run.failures,
                    status,
                })
            }
            Err(source) => Err(JobError::Interrupted {
                job_id,
                succeeded: run.succeeded,
                failures: run.failures,
                source: Box::new(source),
            }),
        }
    }

    /// Ships the orders in input order, reporting each result to the
    /// recorder. Stops at the first error that prevents the job from
    /// continuing and keeps the delta that was not committed.
    async fn run(
        &self,
        job_id: &JobId,
        order_ids: &[OrderId],
        cancel: &watch::Receiver<bool>,
    ) -> JobRun {
        let mut run = JobRun {
            succeeded: 0,
            failures: Vec::new(),
            outcome: JobOutcome::Completed,
            interruption: None,
        };

        let mut orders: HashMap<OrderId, Order> = match self.order_service.get_orders(order_ids).await
        {
            Ok(orders) => orders
                .into_iter()
                .map(|order| (*order.id(), order))
                .collect(),
            Err(e) => {
                run.interruption = Some((e.into(), ProgressDelta::default()));
                return run;
            }
        };

        for order_id in order_ids {
            if *cancel.borrow() {
                run.outcome = JobOutcome::Cancelled;
                break;
            }

            let delta = match self.ship_one(*order_id, orders.get(order_id).cloned()).await {
                Ok(shipped) => {
                    orders.insert(*order_id, shipped);
                    run.succeeded += 1;
                    counter!("bulk_ship_orders_total", "outcome" => "shipped").increment(1);
                    ProgressDelta::succeeded(1)
                }
                Err(failure) => {
                    warn!(
                        %job_id,
                        order_id = %failure.order_id,
                        kind = %failure.kind,
                        error = %failure.reason,
                        "order shipment failed"
                    );
                    counter!("bulk_ship_orders_total", "outcome" => "failed").increment(1);
                    run.failures.push(failure);
                    ProgressDelta::failed(1)
                }
            };

            if let Err(e) = self.recorder.record(job_id, delta).await {
                run.interruption = Some((e, delta));
                return run;
            }

            let failed = run.failures.len() as u64;
            if self.threshold.is_exceeded(run.succeeded + failed, failed) {
                run.outcome = JobOutcome::ThresholdExceeded;
                break;
            }
        }

        run
    }

    /// Keeps retrying a terminal transition that could not be committed,
    /// so the status does not stay running once the store recovers.
    fn spawn_finalizer(&self, job_id: JobId, finalization: Finalization) {
        let recorder = self.recorder.clone();
        let retry = self.finalize_retry.clone();
        tokio::spawn(async move {
            for attempt in 1..=retry.max_attempts {
                tokio::time::sleep(retry.delay_for(attempt)).await;
                match finalization.apply(&recorder, &job_id).await {
                    Ok(status) => {
                        info!(%job_id, state = %status.state(), attempt, "job finalized after retry");
                        return;
                    }
                    Err(
                        e @ (JobError::InvalidState { .. }
                        | JobError::JobNotFound { .. }
                        | JobError::RecorderUnavailable),
                    ) => {
                        warn!(%job_id, error = %e, "job cannot be finalized");
                        return;
                    }
                    Err(e) => debug!(%job_id, attempt, error = %e, "job finalization failed"),
                }
            }
            error!(%job_id, attempts = retry.max_attempts, "job still running after finalization retries");
        });
    }

    /// Runs a job on a background task.
    ///
    /// Progress is observable through [`get_status`](Self::get_status)
    /// while the task runs.
    pub fn spawn_bulk_ship_orders(
        self: Arc<Self>,
        job_id: impl Into<JobId>,
        order_ids: Option<Vec<OrderId>>,
    ) -> JoinHandle<Result<JobReport>> {
        let job_id = job_id.into();
        tokio::spawn(async move { self.bulk_ship_orders(job_id, order_ids).await })
    }

    /// Like [`spawn_bulk_ship_orders`](Self::spawn_bulk_ship_orders) with a
    /// cancel signal.
    pub fn spawn_bulk_ship_orders_with_cancel(
        self: Arc<Self>,
        job_id: impl Into<JobId>,
        order_ids: Option<Vec<OrderId>>,
        cancel: watch::Receiver<bool>,
    ) -> JoinHandle<Result<JobReport>> {
        let job_id = job_id.into();
        tokio::spawn(async move {
            self.bulk_ship_orders_with_cancel(job_id, order_ids, cancel)
                .await
        })
    }

    /// Reads a job's latest committed status.
    pub async fn get_status(&self, job_id: &JobId) -> Result<ProcessingStatus> {
        self.store
            .find_by_id::<ProcessingStatus>(job_id)
            .await?
            .ok_or_else(|| JobError::JobNotFound {
                job_id: job_id.clone(),
            })
    }

    /// Dispatches and saves one order. A dispatched shipment is cancelled
    /// again when the order cannot be saved.
    async fn ship_one(
        &self,
        order_id: OrderId,
        order: Option<Order>,
    ) -> std::result::Result<Order, ShipmentFailure> {
        let mut order = order
            .ok_or_else(|| ShipmentFailure::new(order_id, FailureKind::NotFound, "order not found"))?;

        if !order.status().can_ship() {
            return Err(ShipmentFailure::new(
                order_id,
                FailureKind::InvalidState,
                format!("cannot ship order in {} state", order.status()),
            ));
        }

        let shipment = self
            .shipping
            .dispatch(&order)
            .await
            .map_err(|e: ShippingError| ShipmentFailure::new(order_id, FailureKind::Shipping, e))?;

        let saved = match order.ship(shipment.tracking_number.clone()) {
            Ok(()) => self.order_service.save_order(order).await,
            Err(e) => Err(e.into()),
        };

        match saved {
            Ok(saved) => Ok(saved),
            Err(e) => {
                if let Err(cancel_err) = self.shipping.cancel(&shipment.tracking_number).await {
                    warn!(
                        %order_id,
                        tracking_number = %shipment.tracking_number,
                        error = %cancel_err,
                        "failed to cancel shipment"
                    );
                }
                Err(ShipmentFailure::new(
                    order_id,
                    FailureKind::from_domain(&e),
                    e,
                ))
            }
        }
    }
}
