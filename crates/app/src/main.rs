//! Demo entry point: checks out a batch of orders and ships them in bulk.

use app::{App, AppError, Config};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = Config::from_env();

    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    // 3. Wire the application and run the demo job
    let app = App::new(&config);
    let report = app.run_demo("demo-shipment", config.demo_orders).await?;

    tracing::info!(
        job_id = %report.job_id,
        outcome = %report.outcome,
        succeeded = report.succeeded,
        failed = report.failed,
        "demo finished"
    );
    for failure in &report.failures {
        tracing::warn!(order_id = %failure.order_id, kind = %failure.kind, reason = %failure.reason, "order not shipped");
    }

    // 4. Print the final status and a metrics snapshot
    println!("{}", serde_json::to_string_pretty(&report.status)?);
    println!("{}", metrics_handle.render());

    Ok(())
}
