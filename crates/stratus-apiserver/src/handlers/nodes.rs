use crate::response::{status_deleted, ApiResponse, ListResponse};
use crate::{ApiError, AppState, Result};
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use stratus_core::{ClusterView, Node, NodeSpec, NodeView, Snapshot};
use tracing::info;

/// A node together with its collection health
#[derive(Debug, Serialize)]
pub struct NodeStatus {
    pub node: Node,
    pub degraded: bool,
    pub unreachable: bool,
    pub consecutive_failures: u32,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Whether the snapshot may currently be used for placement
    pub schedulable: bool,
    pub snapshot_age_secs: Option<u64>,
    pub snapshot: Option<Snapshot>,
}

impl NodeStatus {
    fn new(view: &ClusterView, node: &NodeView) -> Self {
        Self {
            node: node.node.as_ref().clone(),
            degraded: node.health.degraded,
            unreachable: node.health.unreachable,
            consecutive_failures: node.health.consecutive_failures,
            last_success: node.health.last_success,
            last_error: node.health.last_error.clone(),
            schedulable: view.usable_snapshot(node).is_some(),
            snapshot_age_secs: node
                .snapshot
                .as_ref()
                .map(|s| s.age(view.now()).as_secs()),
            snapshot: node.snapshot.as_deref().cloned(),
        }
    }
}

fn node_status(state: &AppState, id: &str) -> Result<NodeStatus> {
    let view = state.store.view(Utc::now());
    let node = view
        .get(id)
        .ok_or_else(|| ApiError::NotFound(format!("Node not found: {}", id)))?;
    Ok(NodeStatus::new(&view, node))
}

/// GET /api/v1/nodes
pub async fn list_nodes(State(state): State<Arc<AppState>>) -> Result<Response> {
    let view = state.store.view(Utc::now());
    let nodes = view
        .nodes()
        .iter()
        .map(|node| NodeStatus::new(&view, node))
        .collect();

    Ok(ApiResponse::ok(ListResponse::new(nodes)).into_response())
}

/// GET /api/v1/nodes/{id}
pub async fn get_node(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response> {
    Ok(ApiResponse::ok(node_status(&state, &id)?).into_response())
}

/// POST /api/v1/nodes
///
/// Registers a node, or replaces the declared capacity of an existing one.
pub async fn register_node(
    State(state): State<Arc<AppState>>,
    Json(spec): Json<NodeSpec>,
) -> Result<Response> {
    info!("Registering node: {}", spec.id);

    if spec.id.trim().is_empty() {
        return Err(ApiError::ValidationFailed(
            "Node id must not be empty".to_string(),
        ));
    }
    let node = spec.to_node()?;
    let id = node.id.clone();
    state.store.upsert_node(node);

    Ok(ApiResponse::created(node_status(&state, &id)?).into_response())
}

/// DELETE /api/v1/nodes/{id}
pub async fn remove_node(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response> {
    info!("Removing node: {}", id);

    state
        .store
        .remove_node(&id)
        .ok_or_else(|| ApiError::NotFound(format!("Node not found: {}", id)))?;
    state.metrics.forget_node(&id);
    state.executor.forget_node(&id);

    Ok(status_deleted(&id, "Node"))
}
