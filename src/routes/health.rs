use axum::Json;

use crate::models::ask::StatusMessage;

/// GET /ping: liveness probe.
pub async fn ping() -> Json<StatusMessage> {
    Json(StatusMessage::ok())
}
