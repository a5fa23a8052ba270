use axum::{Json, extract::State, response::IntoResponse};

use crate::AppState;

/// Registered shards with their namespaces and acknowledged sequences.
pub async fn shards(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.coordinator.shards())
}
