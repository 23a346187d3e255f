use crate::affinity::AffinityClass;
use crate::node::NodeId;
use crate::{Result, StratusError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique workload identifier
pub type WorkloadId = String;

/// Resources a workload asks for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    pub cpu_millicores: u64,
    pub memory_bytes: u64,
    #[serde(default)]
    pub gpu_count: u32,
    /// Minimum free memory each assigned GPU must have
    #[serde(default)]
    pub min_gpu_memory_bytes: u64,
}

/// How strongly a workload needs GPUs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpuRequirementMode {
    /// Nodes without enough free GPUs are filtered out
    Mandatory,
    /// GPU fit only influences the score
    Preferred,
    #[default]
    None,
}

/// A unit of schedulable work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workload {
    pub id: WorkloadId,
    /// Preferred node classes, best first. Empty means no preference.
    #[serde(default)]
    pub affinity: Vec<AffinityClass>,
    pub requirements: ResourceRequirements,
    #[serde(default)]
    pub gpu_mode: GpuRequirementMode,
    /// Whether the rebalancer may relocate this workload once running
    #[serde(default)]
    pub movable: bool,
}

impl Workload {
    pub fn new(id: impl Into<String>, requirements: ResourceRequirements) -> Self {
        Self {
            id: id.into(),
            affinity: Vec::new(),
            requirements,
            gpu_mode: GpuRequirementMode::None,
            movable: false,
        }
    }

    /// Whether GPU fit participates in scoring
    pub fn requests_gpu(&self) -> bool {
        self.gpu_mode != GpuRequirementMode::None && self.requirements.gpu_count > 0
    }

    /// Reject workloads that can never be satisfied or identified
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(StratusError::invalid_config(
                "workload id is empty",
                "Give every workload a unique, non-empty id",
            ));
        }

        if self.gpu_mode == GpuRequirementMode::Mandatory && self.requirements.gpu_count == 0 {
            return Err(StratusError::invalid_config(
                format!("workload '{}' requires GPUs but requests 0", self.id),
                "Set requirements.gpu_count >= 1 or change gpu_mode to 'preferred' or 'none'",
            ));
        }

        Ok(())
    }
}

/// Workload lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadState {
    Pending,
    Binding,
    Bound,
    Running,
    Completed,
    Failed,
    Evicted,
}

impl WorkloadState {
    /// Whether `self -> next` is a legal edge of the lifecycle
    pub fn can_transition_to(&self, next: WorkloadState) -> bool {
        use WorkloadState::*;

        matches!(
            (self, next),
            (Pending, Binding)
                | (Binding, Bound)
                | (Binding, Pending)
                | (Binding, Failed)
                | (Bound, Running)
                | (Bound, Failed)
                | (Bound, Evicted)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Evicted)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkloadState::Completed | WorkloadState::Failed | WorkloadState::Evicted
        )
    }

    /// Bound or Running, i.e. the workload occupies a node
    pub fn is_placed(&self) -> bool {
        matches!(self, WorkloadState::Bound | WorkloadState::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadState::Pending => "pending",
            WorkloadState::Binding => "binding",
            WorkloadState::Bound => "bound",
            WorkloadState::Running => "running",
            WorkloadState::Completed => "completed",
            WorkloadState::Failed => "failed",
            WorkloadState::Evicted => "evicted",
        }
    }
}

impl std::fmt::Display for WorkloadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Output of scoring that was committed. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementDecision {
    pub workload_id: WorkloadId,
    pub node_id: NodeId,
    pub score: f64,
    pub timestamp: DateTime<Utc>,
}
