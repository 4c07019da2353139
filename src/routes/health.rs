//! Liveness and status endpoints

use axum::{Json, Router, extract::State, routing::get};
use serde_json::{Value, json};

use crate::routes::AppError;
use crate::state::AppState;
use crate::status::StatusReport;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/status", get(status))
}

/// GET /healthz
async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// GET /status - Cursor, channel and mirror size
async fn status(State(state): State<AppState>) -> Result<Json<StatusReport>, AppError> {
    let report = StatusReport::gather(&state.store, &state.coordinator)?;
    Ok(Json(report))
}
