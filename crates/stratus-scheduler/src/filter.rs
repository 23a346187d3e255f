use crate::types::{FilterResult, SchedulingContext};
use stratus_core::{GpuRequirementMode, NodeView, ResourceQuantities};
use tracing::debug;

/// Filter predicate trait
pub trait FilterPredicate: Send + Sync {
    /// Filter a node for the given workload
    fn filter(&self, context: &SchedulingContext<'_>, node: &NodeView) -> FilterResult;

    /// Name of the filter
    fn name(&self) -> &str;
}

/// Rejects degraded and unreachable nodes and nodes without a fresh snapshot
pub struct NodeIsSchedulable;

impl FilterPredicate for NodeIsSchedulable {
    fn filter(&self, context: &SchedulingContext<'_>, node: &NodeView) -> FilterResult {
        let node_id = node.id();

        if node.health.degraded {
            return FilterResult::fail(
                node_id,
                format!(
                    "Node degraded after {} consecutive collection failures",
                    node.health.consecutive_failures
                ),
            );
        }

        if node.health.unreachable {
            return FilterResult::fail(node_id, "Node unreachable at last collection".to_string());
        }

        let snapshot = match &node.snapshot {
            Some(s) => s,
            None => return FilterResult::fail(node_id, "No snapshot collected yet".to_string()),
        };

        let now = context.view.now();
        if snapshot.is_stale(now, context.view.staleness()) {
            return FilterResult::fail(
                node_id,
                format!(
                    "Snapshot is stale: {}s old, limit {}s",
                    snapshot.age(now).as_secs(),
                    context.view.staleness().as_secs()
                ),
            );
        }

        FilterResult::pass(node_id)
    }

    fn name(&self) -> &str {
        "NodeIsSchedulable"
    }
}

/// CPU and memory headroom must cover the request, no overcommit
pub struct NodeFitsResources;

impl FilterPredicate for NodeFitsResources {
    fn filter(&self, context: &SchedulingContext<'_>, node: &NodeView) -> FilterResult {
        let node_id = node.id();
        let snapshot = match context.snapshot(node) {
            Some(s) => s,
            None => return FilterResult::fail(node_id, "No usable snapshot".to_string()),
        };

        let requested = &context.workload.requirements;
        let cpu_headroom = context.cpu_headroom(node, snapshot);
        let memory_headroom = context.memory_headroom(node, snapshot);

        debug!(
            "Node {} headroom CPU: {} milli, Memory: {}",
            node_id,
            cpu_headroom,
            ResourceQuantities::format_memory(memory_headroom)
        );

        if requested.cpu_millicores > cpu_headroom {
            return FilterResult::fail(
                node_id,
                format!(
                    "Insufficient CPU: requested {} milli, available {} milli",
                    requested.cpu_millicores, cpu_headroom
                ),
            );
        }

        if requested.memory_bytes > memory_headroom {
            return FilterResult::fail(
                node_id,
                format!(
                    "Insufficient memory: requested {}, available {}",
                    ResourceQuantities::format_memory(requested.memory_bytes),
                    ResourceQuantities::format_memory(memory_headroom)
                ),
            );
        }

        FilterResult::pass(node_id)
    }

    fn name(&self) -> &str {
        "NodeFitsResources"
    }
}

/// Mandatory GPU workloads need enough free devices with enough free memory each
pub struct GpuFitsRequirements;

impl FilterPredicate for GpuFitsRequirements {
    fn filter(&self, context: &SchedulingContext<'_>, node: &NodeView) -> FilterResult {
        let node_id = node.id();
        if context.workload.gpu_mode != GpuRequirementMode::Mandatory {
            return FilterResult::pass(node_id);
        }

        let snapshot = match context.snapshot(node) {
            Some(s) => s,
            None => return FilterResult::fail(node_id, "No usable snapshot".to_string()),
        };

        let requested = context.workload.requirements.gpu_count as usize;
        let reserved = context.reserved_gpus(node);
        let eligible = context
            .eligible_gpus(snapshot)
            .count()
            .saturating_sub(reserved);

        if eligible < requested {
            let free = snapshot
                .gpu_devices
                .iter()
                .filter(|d| context.gpu_is_free(d))
                .count();
            return FilterResult::fail(
                node_id,
                format!(
                    "Insufficient GPUs: requested {} with {} free memory each, node has {} free of {} ({} with enough memory, {} reserved)",
                    requested,
                    ResourceQuantities::format_memory(
                        context.workload.requirements.min_gpu_memory_bytes
                    ),
                    free,
                    snapshot.gpu_devices.len(),
                    eligible,
                    reserved
                ),
            );
        }

        FilterResult::pass(node_id)
    }

    fn name(&self) -> &str {
        "GpuFitsRequirements"
    }
}

/// Get default filter predicates
pub fn default_filters() -> Vec<Box<dyn FilterPredicate>> {
    vec![
        Box::new(NodeIsSchedulable),
        Box::new(NodeFitsResources),
        Box::new(GpuFitsRequirements),
    ]
}
