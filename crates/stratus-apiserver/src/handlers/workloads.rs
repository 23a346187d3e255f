use crate::response::{ApiResponse, ListResponse};
use crate::{ApiError, AppState, Result};
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;
use stratus_core::{
    AffinityClass, GpuRequirementMode, ResourceQuantities, ResourceRequirements, Workload,
    WorkloadState,
};
use tracing::info;

/// Workload submission body, with human-readable quantities
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkloadRequest {
    pub id: String,
    /// Preferred node classes, best first
    #[serde(default)]
    pub affinity: Vec<AffinityClass>,
    /// e.g. "2" or "500m"
    pub cpu: String,
    /// e.g. "4Gi"
    pub memory: String,
    #[serde(default)]
    pub gpus: u32,
    /// Minimum free memory per GPU, e.g. "8Gi"
    #[serde(default)]
    pub gpu_memory: Option<String>,
    #[serde(default)]
    pub gpu_mode: GpuRequirementMode,
    #[serde(default)]
    pub movable: bool,
}

impl WorkloadRequest {
    pub fn to_workload(&self) -> stratus_core::Result<Workload> {
        let quantities = ResourceQuantities::parse(&self.cpu, &self.memory)?;
        let min_gpu_memory_bytes = match &self.gpu_memory {
            Some(s) => ResourceQuantities::parse_memory(s)?,
            None => 0,
        };

        let mut workload = Workload::new(
            self.id.clone(),
            ResourceRequirements {
                cpu_millicores: quantities.cpu_millicores,
                memory_bytes: quantities.memory_bytes,
                gpu_count: self.gpus,
                min_gpu_memory_bytes,
            },
        );
        workload.affinity = self.affinity.clone();
        workload.gpu_mode = self.gpu_mode;
        workload.movable = self.movable;
        Ok(workload)
    }
}

/// Lifecycle states the runtime reports back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportedState {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub state: ReportedState,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WorkloadListParams {
    pub state: Option<WorkloadState>,
}

/// POST /api/v1/workloads
///
/// Enqueues the workload as Pending and returns without waiting for placement.
pub async fn submit_workload(
    State(state): State<Arc<AppState>>,
    Json(request): Json<WorkloadRequest>,
) -> Result<Response> {
    info!("Submitting workload: {}", request.id);

    let workload = request.to_workload()?;
    let record = state.executor.submit(workload)?;

    Ok(ApiResponse::accepted(record).into_response())
}

/// GET /api/v1/workloads
pub async fn list_workloads(
    State(state): State<Arc<AppState>>,
    Query(params): Query<WorkloadListParams>,
) -> Result<Response> {
    let records = state
        .registry()
        .list()
        .into_iter()
        .filter(|r| params.state.is_none_or(|s| r.state == s))
        .collect();

    Ok(ApiResponse::ok(ListResponse::new(records)).into_response())
}

/// GET /api/v1/workloads/{id}
pub async fn get_workload(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response> {
    let record = state
        .registry()
        .get(&id)
        .ok_or_else(|| ApiError::NotFound(format!("Workload not found: {}", id)))?;

    Ok(ApiResponse::ok(record).into_response())
}

/// PUT /api/v1/workloads/{id}/status
pub async fn update_workload_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(update): Json<StatusUpdate>,
) -> Result<Response> {
    info!("Workload {} reported {:?}", id, update.state);

    let record = match update.state {
        ReportedState::Running => state.executor.mark_running(&id)?,
        ReportedState::Completed => state.executor.complete(&id)?,
        ReportedState::Failed => state.executor.fail(
            &id,
            update
                .reason
                .unwrap_or_else(|| "reported failed".to_string()),
        )?,
    };

    Ok(ApiResponse::ok(record).into_response())
}

/// DELETE /api/v1/workloads/{id}
///
/// Unbinds the workload from its node and marks it Evicted.
pub async fn evict_workload(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response> {
    info!("Evicting workload: {}", id);

    let record = state.executor.evict(&id).await?;

    Ok(ApiResponse::ok(record).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(json: serde_json::Value) -> WorkloadRequest {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_request_quantities_parsed() {
        let w = request(serde_json::json!({
            "id": "train-1",
            "affinity": ["training", "inference"],
            "cpu": "1500m",
            "memory": "4Gi",
            "gpus": 2,
            "gpu_memory": "8Gi",
            "gpu_mode": "mandatory",
            "movable": true
        }))
        .to_workload()
        .unwrap();

        assert_eq!(w.requirements.cpu_millicores, 1500);
        assert_eq!(w.requirements.memory_bytes, 4 << 30);
        assert_eq!(w.requirements.gpu_count, 2);
        assert_eq!(w.requirements.min_gpu_memory_bytes, 8 << 30);
        assert_eq!(w.gpu_mode, GpuRequirementMode::Mandatory);
        assert_eq!(w.affinity, vec![AffinityClass::Training, AffinityClass::Inference]);
        assert!(w.movable);
    }

    #[test]
    fn test_request_defaults() {
        let w = request(serde_json::json!({ "id": "w", "cpu": "1", "memory": "1Gi" }))
            .to_workload()
            .unwrap();
        assert_eq!(w.gpu_mode, GpuRequirementMode::None);
        assert!(w.affinity.is_empty());
        assert!(!w.movable);
    }

    #[test]
    fn test_request_bad_quantity() {
        let result = request(serde_json::json!({ "id": "w", "cpu": "lots", "memory": "1Gi" }))
            .to_workload();
        assert!(result.is_err());
    }
}
