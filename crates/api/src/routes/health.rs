//! Liveness plus the state of the checkout side channels.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    /// Confirmed-order events waiting for the bus.
    pub pending_events: usize,
    /// `closed`, `open` or `half_open`.
    pub notification_circuit: String,
}

/// GET /health
pub async fn check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        pending_events: state.saga.publish_queue().pending(),
        notification_circuit: state.saga.notifications().breaker_state().to_string(),
    })
}
