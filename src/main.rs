use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use hal_broker::app_state::AppState;
use hal_broker::config::AppConfig;
use hal_broker::routes;
use hal_broker::services::{broker, geodata::GeodataPipeline, store::JobStore};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing hal-broker server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);
    broker::describe_metrics();

    // Load the job store; a corrupt document stops startup here
    tracing::info!(path = %config.store_path.display(), "Opening job store");
    let store = JobStore::open(&config.store_path)
        .await
        .expect("Failed to open job store");
    let store = Arc::new(store);

    tracing::info!("Initializing geodata pipeline");
    if config.openai_api_key.is_none() {
        tracing::warn!("HAL_OPENAI_API_KEY is not set, every question will fail");
    }
    let pipeline = GeodataPipeline::new(&config).expect("Failed to initialize geodata pipeline");

    let state = AppState::new(store, Arc::new(pipeline), &config);

    if config.stale_job_timeout_secs > 0 {
        spawn_reaper(state.clone(), config.stale_job_timeout_secs);
    }

    let app = routes::router(state, Some(prometheus_handle));

    let bind_addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!(
        "Server listening on http://{}{}",
        bind_addr,
        config.base_path.as_deref().unwrap_or("")
    );

    axum::serve(listener, app)
        .await
        .expect("Server error");
}

/// Periodically fail in-progress jobs whose worker never reported back.
fn spawn_reaper(state: AppState, timeout_secs: u64) {
    let max_age = chrono::Duration::seconds(timeout_secs as i64);
    let period = Duration::from_secs((timeout_secs / 4).clamp(1, 60));

    tracing::info!(timeout_secs, "Stale job reaper enabled");

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            match state.broker.reap_stale(max_age).await {
                Ok(0) => tracing::trace!("No stale jobs"),
                Ok(reaped) => tracing::info!(reaped, "Stale jobs failed"),
                Err(e) => tracing::error!(error = %e, "Stale job sweep failed"),
            }
        }
    });
}
