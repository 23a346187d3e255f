use crate::response::{ApiResponse, ListResponse};
use crate::{AppState, Result};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Default, Deserialize)]
pub struct AuditParams {
    /// Only entries for this workload
    pub workload: Option<String>,
    /// Keep the most recent N entries
    pub limit: Option<usize>,
}

/// GET /api/v1/audit
pub async fn list_audit(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AuditParams>,
) -> Result<Response> {
    let mut entries = match &params.workload {
        Some(workload_id) => state.audit().entries_for(workload_id),
        None => state.audit().entries(),
    };
    if let Some(limit) = params.limit {
        let skip = entries.len().saturating_sub(limit);
        entries.drain(..skip);
    }

    Ok(ApiResponse::ok(ListResponse::new(entries)).into_response())
}

/// GET /api/v1/decisions
///
/// Committed placements, one per successful bind.
pub async fn list_decisions(State(state): State<Arc<AppState>>) -> Result<Response> {
    Ok(ApiResponse::ok(ListResponse::new(state.audit().decisions())).into_response())
}
