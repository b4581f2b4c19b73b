//! Wiring for the order management core and bulk shipment jobs.
//!
//! Builds the store, order service, progress recorder and shipment
//! coordinator from a [`Config`], and drives a demo run that checks out a
//! batch of orders and ships them while logging live progress.

pub mod config;
pub mod error;

use std::sync::Arc;
use std::time::Duration;

use common::{JobId, OrderId};
use domain::{CheckoutRequest, Money, OrderService, Product};
use jobs::{BulkShipmentCoordinator, InMemoryShippingService, JobReport, ProgressRecorder};
use metrics::gauge;
use store::{Entity, InMemoryStore};
use tracing::info;

pub use config::Config;
pub use error::AppError;

/// Products seeded by [`App::seed_catalog`]: sku, name, price in cents, stock.
pub const CATALOG: &[(&str, &str, i64, u32)] = &[
    ("SKU-001", "Widget", 2_500, 1_000),
    ("SKU-002", "Gadget", 4_999, 1_000),
    ("SKU-003", "Doohickey", 12_000, 1_000),
];

const PROGRESS_INTERVAL: Duration = Duration::from_millis(20);

pub type Coordinator = BulkShipmentCoordinator<InMemoryStore, InMemoryShippingService>;

/// Application state shared by the binary and tests.
pub struct App {
    pub store: InMemoryStore,
    pub order_service: OrderService<InMemoryStore>,
    pub shipping: InMemoryShippingService,
    pub coordinator: Arc<Coordinator>,
}

impl App {
    /// Creates the application over a fresh in-memory store.
    ///
    /// Must be called inside a Tokio runtime; the progress recorder is
    /// spawned immediately.
    pub fn new(config: &Config) -> Self {
        Self::with_store(InMemoryStore::new(), config)
    }

    /// Creates the application over an existing store.
    pub fn with_store(store: InMemoryStore, config: &Config) -> Self {
        let order_service = OrderService::new(store.clone());
        let shipping = InMemoryShippingService::new();
        let recorder = ProgressRecorder::spawn(
            store.clone(),
            config.retry_config(),
            config.progress_channel_capacity,
        );
        let coordinator = BulkShipmentCoordinator::new(store.clone(), shipping.clone(), recorder)
            .with_threshold(config.failure_threshold());

        Self {
            store,
            order_service,
            shipping,
            coordinator: Arc::new(coordinator),
        }
    }

    /// Saves every product in [`CATALOG`].
    pub async fn seed_catalog(&self) -> Result<(), AppError> {
        for &(sku, name, cents, stock) in CATALOG {
            self.order_service
                .save_product(Product::new(sku, name, Money::from_cents(cents), stock))
                .await?;
        }
        info!(products = CATALOG.len(), "catalog seeded");
        Ok(())
    }

    /// Checks out `count` orders spread over the catalog.
    pub async fn checkout_orders(&self, count: usize) -> Result<Vec<OrderId>, AppError> {
        let mut order_ids = Vec::with_capacity(count);
        for i in 0..count {
            let (sku, ..) = CATALOG[i % CATALOG.len()];
            let mut request =
                CheckoutRequest::new(format!("Customer {i}"), format!("customer{i}@example.com"))
                    .line(sku, 1 + (i % 3) as u32);
            if i % 4 == 0 {
                request = request.coupon("SALE10");
            }
            let order = self.order_service.checkout_order(request).await?;
            order_ids.push(*order.id());
        }
        Ok(order_ids)
    }

    /// Ships the given orders on a background task, logging progress until
    /// the job finishes.
    pub async fn ship_orders(
        &self,
        job_id: impl Into<JobId>,
        order_ids: Vec<OrderId>,
    ) -> Result<JobReport, AppError> {
        let job_id = job_id.into();
        let job = Arc::clone(&self.coordinator).spawn_bulk_ship_orders(job_id.clone(), Some(order_ids));

        while !job.is_finished() {
            if let Ok(status) = self.coordinator.get_status(&job_id).await {
                gauge!("bulk_job_percent_complete", "job_id" => job_id.to_string())
                    .set(status.percent_complete());
                info!(
                    %job_id,
                    state = %status.state(),
                    processed = status.processed_count(),
                    failed = status.failed_count(),
                    total = status.total_count(),
                    percent = status.percent_complete(),
                    "bulk shipment progress"
                );
            }
            tokio::time::sleep(PROGRESS_INTERVAL).await;
        }

        Ok(job.await??)
    }

    /// Seeds the catalog, checks out `order_count` orders and ships them.
    pub async fn run_demo(
        &self,
        job_id: impl Into<JobId>,
        order_count: usize,
    ) -> Result<JobReport, AppError> {
        self.seed_catalog().await?;
        let order_ids = self.checkout_orders(order_count).await?;
        self.ship_orders(job_id, order_ids).await
    }
}
