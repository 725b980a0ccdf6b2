use stable_photo_sync::{app_state::AppState, config::AppConfig};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting upload queue worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    // Expose Prometheus metrics if requested
    if let Some(addr) = &config.metrics_addr {
        let addr: SocketAddr = addr.parse().expect("Invalid METRICS_ADDR");
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .expect("Failed to install Prometheus metrics exporter");
        tracing::info!(%addr, "Metrics exporter listening");
    }

    metrics::describe_counter!("photo_uploads_total", "Photos stored via signed URL");
    metrics::describe_counter!(
        "photo_uploads_failed_total",
        "Uploads that failed after inline retries"
    );
    metrics::describe_counter!(
        "photo_upload_retries_total",
        "Inline PUT retries after timeouts or lost connections"
    );
    metrics::describe_counter!(
        "upload_queue_enqueued_total",
        "Uploads handed to the background queue"
    );
    metrics::describe_counter!(
        "upload_queue_dropped_total",
        "Queued uploads dropped after max retries"
    );
    metrics::describe_gauge!("upload_queue_depth", "Uploads waiting in the queue");
    metrics::describe_histogram!(
        "upload_queue_drain_seconds",
        "Time spent on one pass over the queue"
    );

    // Wire services and load the persisted queue
    tracing::info!(store = %config.queue_store, "Loading upload queue");
    let state = AppState::from_config(&config)
        .await
        .expect("Failed to initialize upload services");

    let pending = state.queue.len().await;
    tracing::info!(pending, "Worker ready, starting queue monitor");

    // Runs until the process is torn down
    state.processor.run().await;
}
