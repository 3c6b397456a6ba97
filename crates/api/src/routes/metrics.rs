//! Prometheus scrape endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;

use crate::AppState;

/// GET /metrics
///
/// Refreshes the publish backlog gauge before rendering.
pub async fn get(
    State((state, handle)): State<(Arc<AppState>, PrometheusHandle)>,
) -> impl IntoResponse {
    metrics::gauge!("publish_queue_pending").set(state.saga.publish_queue().pending() as f64);
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        handle.render(),
    )
}
