//! Bulk shipment jobs with live progress tracking.
//!
//! A [`BulkShipmentCoordinator`] ships a batch of orders one at a time. After
//! each order it reports progress to a [`ProgressRecorder`], a separate task
//! that commits the job's [`ProcessingStatus`] on its own, so observers can
//! follow a running job and a late failure never erases earlier progress.

pub mod coordinator;
pub mod error;
pub mod recorder;
pub mod shipping;
pub mod status;

pub use coordinator::{
    BulkShipmentCoordinator, FailureKind, FailureThreshold, JobOutcome, JobReport,
    ShipmentFailure,
};
pub use error::JobError;
pub use recorder::{ProgressRecorder, ProgressRecorderHandle, RetryConfig};
pub use shipping::{InMemoryShippingService, Shipment, ShippingError, ShippingService};
pub use status::{JobState, ProcessingStatus, ProgressDelta};
