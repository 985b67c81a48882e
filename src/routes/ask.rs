use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::Json;

use crate::app_state::AppState;
use crate::models::ask::{AskForm, StatusMessage};
use crate::models::job::JobRecord;
use crate::routes::pages;
use crate::services::broker::BrokerError;
use crate::services::status::QueryError;

/// GET /: the question form.
pub async fn index(State(state): State<AppState>) -> Html<String> {
    Html(pages::index_page(state.base_path()))
}

/// POST /ask: submit a question and redirect to its page.
///
/// The job is keyed on the raw form body, so resubmitting the same form lands
/// on the same job.
pub async fn submit_question(State(state): State<AppState>, body: Bytes) -> Response {
    let (input, form) = match AskForm::from_body(&body) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::debug!(error = %e, "Rejected malformed question");
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };

    let id = match state.broker.submit(&input).await {
        Ok(id) => id,
        Err(BrokerError::Identity(e)) => {
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to record question");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    tracing::info!(job_id = %id, question = %form.question, "Question asked");

    let location = pages::build_path(state.base_path(), &format!("/ask/{id}"));
    (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
}

/// GET /ask/{id}: page showing the job, polling until it finishes.
pub async fn question_page(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Html<String>, Response> {
    let record = lookup(&state, &id).await?;
    Ok(Html(pages::ask_page(state.base_path(), &id, &record)))
}

/// POST /ask/{id}: current job record as JSON.
pub async fn question_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobRecord>, Response> {
    lookup(&state, &id).await.map(Json)
}

async fn lookup(state: &AppState, id: &str) -> Result<JobRecord, Response> {
    match state.status.query(id).await {
        Ok(record) => Ok(record),
        Err(QueryError::NotFound(_)) => Err(not_found()),
        Err(QueryError::Store(e)) => {
            tracing::error!(job_id = %id, error = %e, "Failed to read job");
            Err(StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
    }
}

/// 404 with the JSON body clients expect.
pub fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(StatusMessage::not_found())).into_response()
}

/// Fallback for unknown routes.
pub async fn fallback() -> Response {
    not_found()
}
