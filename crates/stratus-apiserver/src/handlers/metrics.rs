use crate::{AppState, Result};
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

/// GET /metrics, Prometheus text exposition
pub async fn export_metrics(State(state): State<Arc<AppState>>) -> Result<Response> {
    state
        .metrics
        .set_pending_workloads(state.registry().pending_count());
    let body = state.metrics.render()?;

    Ok(([(header::CONTENT_TYPE, state.metrics.content_type())], body).into_response())
}
