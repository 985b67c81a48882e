use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;

pub mod ask;
pub mod health;
pub mod metrics;
pub mod pages;
pub mod results;

/// Largest accepted request body; questions are short form posts.
const BODY_LIMIT: usize = 64 * 1024;

/// Build the HTTP surface, nested under the configured base path if any.
///
/// `/metrics` is only mounted when a Prometheus recorder is installed.
pub fn router(state: AppState, prometheus: Option<Arc<PrometheusHandle>>) -> Router {
    let mut routes = Router::new()
        .route("/", get(ask::index))
        .route("/ask", post(ask::submit_question))
        .route(
            "/ask/{id}",
            get(ask::question_page).post(ask::question_status),
        )
        .route("/results/{*path}", get(results::serve_result))
        .route("/ping", get(health::ping))
        .with_state(state.clone());
    let index = get(ask::index).with_state(state.clone());

    if let Some(handle) = prometheus {
        routes = routes.route(
            "/metrics",
            get(metrics::prometheus_metrics).with_state(handle),
        );
    }

    let app = match state.base_path.as_deref() {
        // Nesting only maps `/` to the bare base path; serve the slash form too.
        Some(base) => Router::new()
            .nest(base, routes)
            .route(&format!("{base}/"), index),
        None => routes,
    };

    app.fallback(ask::fallback)
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
}
