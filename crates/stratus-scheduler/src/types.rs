use serde::Serialize;
use stratus_core::{ClusterView, CompatibilityTable, GpuDevice, NodeId, NodeView, Snapshot, Workload};

/// Everything filters and score functions may look at for one workload
///
/// Borrowed from an immutable [`ClusterView`]; scoring performs no I/O and
/// takes no locks.
#[derive(Debug, Clone, Copy)]
pub struct SchedulingContext<'a> {
    /// Workload to be placed
    pub workload: &'a Workload,
    /// Nodes and snapshots at decision time
    pub view: &'a ClusterView,
    /// Affinity class pair scores
    pub compatibility: &'a CompatibilityTable,
    /// Devices at or above this utilization are busy
    pub gpu_saturation_percent: f64,
}

impl<'a> SchedulingContext<'a> {
    pub fn new(
        workload: &'a Workload,
        view: &'a ClusterView,
        compatibility: &'a CompatibilityTable,
        gpu_saturation_percent: f64,
    ) -> Self {
        Self {
            workload,
            view,
            compatibility,
            gpu_saturation_percent,
        }
    }

    /// The node's snapshot if it may be used for decisions
    pub fn snapshot(&self, node: &'a NodeView) -> Option<&'a Snapshot> {
        self.view.usable_snapshot(node)
    }

    /// CPU headroom after subtracting placements the snapshot does not show yet
    pub fn cpu_headroom(&self, node: &NodeView, snapshot: &Snapshot) -> u64 {
        snapshot
            .cpu_headroom(&node.node.capacity)
            .saturating_sub(self.view.reserved(node.id()).cpu_millicores)
    }

    /// Memory headroom after subtracting placements the snapshot does not show yet
    pub fn memory_headroom(&self, node: &NodeView, snapshot: &Snapshot) -> u64 {
        snapshot
            .memory_headroom(&node.node.capacity)
            .saturating_sub(self.view.reserved(node.id()).memory_bytes)
    }

    /// GPUs already promised to placements on the node
    pub fn reserved_gpus(&self, node: &NodeView) -> usize {
        self.view.reserved(node.id()).gpu_count as usize
    }

    /// Whether a device still has compute to spare
    pub fn gpu_is_free(&self, device: &GpuDevice) -> bool {
        device.utilization_percent < self.gpu_saturation_percent
    }

    /// Free devices that also have the workload's minimum free memory
    pub fn eligible_gpus<'s>(&'s self, snapshot: &'s Snapshot) -> impl Iterator<Item = &'s GpuDevice> + 's {
        let min_free = self.workload.requirements.min_gpu_memory_bytes;
        snapshot
            .gpu_devices
            .iter()
            .filter(move |d| self.gpu_is_free(d) && d.memory_free_bytes() >= min_free)
    }
}

/// Result of filtering a node
#[derive(Debug, Clone)]
pub struct FilterResult {
    /// Node id
    pub node_id: NodeId,
    /// Whether the node passed the filter
    pub passed: bool,
    /// Reason for failure (if any)
    pub reason: Option<String>,
}

impl FilterResult {
    /// Create a passing filter result
    pub fn pass(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            passed: true,
            reason: None,
        }
    }

    /// Create a failing filter result
    pub fn fail(node_id: impl Into<String>, reason: String) -> Self {
        Self {
            node_id: node_id.into(),
            passed: false,
            reason: Some(reason),
        }
    }
}

/// One score function's verdict on a node
#[derive(Debug, Clone)]
pub struct ScoreResult {
    /// Node id
    pub node_id: NodeId,
    /// Score in [0, 100], higher is better
    pub score: f64,
}

impl ScoreResult {
    pub fn new(node_id: impl Into<String>, score: f64) -> Self {
        Self {
            node_id: node_id.into(),
            score: score.clamp(0.0, 100.0),
        }
    }
}

/// Total score of an eligible node
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeScore {
    pub node_id: NodeId,
    pub score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_result() {
        let pass = FilterResult::pass("node1");
        assert!(pass.passed);
        assert!(pass.reason.is_none());

        let fail = FilterResult::fail("node2", "Insufficient CPU".to_string());
        assert!(!fail.passed);
        assert_eq!(fail.reason, Some("Insufficient CPU".to_string()));
    }

    #[test]
    fn test_score_result_clamped() {
        assert_eq!(ScoreResult::new("n", 140.0).score, 100.0);
        assert_eq!(ScoreResult::new("n", -3.0).score, 0.0);
    }
}
