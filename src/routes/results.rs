use std::path::{Component, Path as FsPath, PathBuf};

use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};

use crate::app_state::AppState;
use crate::routes::ask::not_found;

/// GET /results/{*path}: a file the pipeline wrote, or 404.
pub async fn serve_result(State(state): State<AppState>, Path(path): Path<String>) -> Response {
    let Some(relative) = confined(path.trim_start_matches('/')) else {
        tracing::debug!(path = %path, "Refused result path");
        return not_found();
    };

    let full = state.results_dir.join(relative);
    match tokio::fs::read(&full).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, content_type(&full))], bytes).into_response(),
        Err(_) => not_found(),
    }
}

/// `path` as a relative path that cannot leave the results directory.
fn confined(path: &str) -> Option<PathBuf> {
    let candidate = FsPath::new(path);
    let mut components = candidate.components().peekable();
    components.peek()?;
    components
        .all(|c| matches!(c, Component::Normal(_)))
        .then(|| candidate.to_path_buf())
}

fn content_type(path: &FsPath) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") | Some("geojson") => "application/json; charset=utf-8",
        Some("html") => "text/html; charset=utf-8",
        _ => "text/plain; charset=utf-8",
    }
}
