use axum::{extract::State, http::StatusCode, response::IntoResponse};

use crate::AppState;

/// GET /metrics — Prometheus text exposition.
pub async fn render_metrics(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, state.metrics.render())
}
