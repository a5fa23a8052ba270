use axum::{Json, extract::State, response::IntoResponse};

use crate::AppState;

/// Coordinator counters: buffered/flushed events, flush cycles, registered
/// shards, bytes written.
pub async fn stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.coordinator.stats())
}
