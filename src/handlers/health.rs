use axum::{Json, extract::State, response::IntoResponse};

use crate::AppState;

/// Liveness probe with coordinator uptime in seconds.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.coordinator.stats();
    Json(serde_json::json!({
        "status": "ok",
        "uptime": stats.uptime_ms / 1000,
    }))
}
