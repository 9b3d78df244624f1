//! Observability module for Harbor.
//!
//! Provides logging initialization and the Prometheus metrics endpoint.

use crate::config::ObservabilityConfig;
use crate::error::{HarborError, Result};
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize observability (logging and metrics).
pub fn init(config: &ObservabilityConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| HarborError::Internal(format!("Failed to init logging: {}", e)))?;
    } else {
        subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| HarborError::Internal(format!("Failed to init logging: {}", e)))?;
    }

    info!("Observability initialized");
    Ok(())
}

/// Run the Prometheus metrics server.
pub async fn run_metrics_server(config: ObservabilityConfig) -> Result<()> {
    let builder = PrometheusBuilder::new();

    let handle = builder
        .install_recorder()
        .map_err(|e| HarborError::Internal(format!("Failed to install metrics recorder: {}", e)))?;

    register_metrics();

    let app = axum::Router::new()
        .route(
            "/metrics",
            axum::routing::get(move || async move { handle.render() }),
        )
        .route("/health", axum::routing::get(|| async { "OK" }));

    let listener = TcpListener::bind(config.metrics_addr).await?;
    info!(addr = %config.metrics_addr, "Metrics server listening");

    axum::serve(listener, app)
        .await
        .map_err(|e| HarborError::Internal(e.to_string()))?;

    Ok(())
}

/// Register standard metrics.
fn register_metrics() {
    // Placement metrics
    gauge!("harbor_owned_shards").set(0.0);
    gauge!("harbor_cluster_nodes").set(0.0);

    // Job pipeline metrics
    counter!("harbor_jobs_created_total").absolute(0);
    counter!("harbor_jobs_processed_total").absolute(0);
    counter!("harbor_jobs_failed_total").absolute(0);
    counter!("harbor_jobs_poison_total").absolute(0);

    // Mover metrics
    counter!("harbor_artifacts_moved_total").absolute(0);
    counter!("harbor_artifact_moves_failed_total").absolute(0);
}

/// Update placement gauges after ownership is computed.
pub fn update_placement_metrics(owned_shards: usize, cluster_nodes: usize) {
    gauge!("harbor_owned_shards").set(owned_shards as f64);
    gauge!("harbor_cluster_nodes").set(cluster_nodes as f64);
}

/// Record a created job.
pub fn record_job_created() {
    counter!("harbor_jobs_created_total").increment(1);
}
