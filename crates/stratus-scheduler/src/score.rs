use crate::types::{SchedulingContext, ScoreResult};
use stratus_core::{GpuDevice, NodeView, ScoreWeights};
use tracing::debug;

/// Scoring function trait
pub trait ScoreFunction: Send + Sync {
    /// Score a node for the given workload (0-100, higher is better)
    ///
    /// Only called for nodes that passed every filter.
    fn score(&self, context: &SchedulingContext<'_>, node: &NodeView) -> ScoreResult;

    /// Name of the scoring function
    fn name(&self) -> &str;
}

/// Prefer nodes with more free CPU and memory
pub struct ResourceHeadroom;

impl ScoreFunction for ResourceHeadroom {
    fn score(&self, context: &SchedulingContext<'_>, node: &NodeView) -> ScoreResult {
        let node_id = node.id();
        let snapshot = match context.snapshot(node) {
            Some(s) => s,
            None => return ScoreResult::new(node_id, 0.0),
        };

        let capacity = &node.node.capacity;
        let cpu_free = free_fraction(context.cpu_headroom(node, snapshot), capacity.cpu_millicores);
        let memory_free =
            free_fraction(context.memory_headroom(node, snapshot), capacity.memory_bytes);
        let score = (cpu_free + memory_free) / 2.0 * 100.0;

        debug!(
            "Node {} headroom score: {:.1} (CPU free: {:.1}%, Memory free: {:.1}%)",
            node_id,
            score,
            cpu_free * 100.0,
            memory_free * 100.0
        );

        ScoreResult::new(node_id, score)
    }

    fn name(&self) -> &str {
        "ResourceHeadroom"
    }
}

/// Share of capacity still free. A node with no capacity has none free.
fn free_fraction(headroom: u64, capacity: u64) -> f64 {
    if capacity == 0 {
        return 0.0;
    }
    (headroom as f64 / capacity as f64).clamp(0.0, 1.0)
}

/// Soft match between the workload's preferred classes and the node's class
pub struct AffinityMatch;

impl ScoreFunction for AffinityMatch {
    fn score(&self, context: &SchedulingContext<'_>, node: &NodeView) -> ScoreResult {
        let score = context
            .compatibility
            .score(&context.workload.affinity, node.node.affinity_class);
        ScoreResult::new(node.id(), score)
    }

    fn name(&self) -> &str {
        "AffinityMatch"
    }
}

/// Reward nodes whose GPUs are less busy
///
/// Half the score is the fraction of devices below the saturation threshold,
/// half the free memory fraction of the least-loaded eligible device. Fixed
/// at 100 when the workload does not ask for GPUs.
pub struct GpuFit;

impl GpuFit {
    fn least_loaded<'a>(devices: impl Iterator<Item = &'a GpuDevice>) -> Option<&'a GpuDevice> {
        devices.min_by(|a, b| {
            a.utilization_percent
                .total_cmp(&b.utilization_percent)
                .then_with(|| b.memory_free_fraction().total_cmp(&a.memory_free_fraction()))
                .then_with(|| a.index.cmp(&b.index))
        })
    }
}

impl ScoreFunction for GpuFit {
    fn score(&self, context: &SchedulingContext<'_>, node: &NodeView) -> ScoreResult {
        let node_id = node.id();
        if !context.workload.requests_gpu() {
            return ScoreResult::new(node_id, 100.0);
        }

        let snapshot = match context.snapshot(node) {
            Some(s) => s,
            None => return ScoreResult::new(node_id, 0.0),
        };
        if snapshot.gpu_devices.is_empty() {
            return ScoreResult::new(node_id, 0.0);
        }

        let total = snapshot.gpu_devices.len() as f64;
        let free = snapshot
            .gpu_devices
            .iter()
            .filter(|d| context.gpu_is_free(d))
            .count()
            .saturating_sub(context.reserved_gpus(node)) as f64;
        let memory_free = Self::least_loaded(context.eligible_gpus(snapshot))
            .map(|d| d.memory_free_fraction())
            .unwrap_or(0.0);

        let score = (0.5 * free / total + 0.5 * memory_free) * 100.0;
        debug!(
            "Node {} GPU fit score: {:.1} ({} of {} devices free, best device {:.0}% memory free)",
            node_id,
            score,
            free,
            total,
            memory_free * 100.0
        );

        ScoreResult::new(node_id, score)
    }

    fn name(&self) -> &str {
        "GpuFit"
    }
}

/// A score function and its share of the total
pub struct WeightedScore {
    pub function: Box<dyn ScoreFunction>,
    pub weight: f64,
}

/// Get default scoring functions with the configured weights
pub fn default_scores(weights: &ScoreWeights) -> Vec<WeightedScore> {
    vec![
        WeightedScore {
            function: Box::new(ResourceHeadroom),
            weight: weights.headroom,
        },
        WeightedScore {
            function: Box::new(AffinityMatch),
            weight: weights.affinity,
        },
        WeightedScore {
            function: Box::new(GpuFit),
            weight: weights.gpu,
        },
    ]
}

/// Weighted mean of sub-scores, normalised by the total weight
///
/// With weights summing to 1 this is the plain weighted sum.
pub fn calculate_weighted_score(scores: &[(ScoreResult, f64)]) -> f64 {
    let total_weight: f64 = scores.iter().map(|(_, w)| *w).sum();
    if scores.is_empty() || total_weight <= 0.0 {
        return 0.0;
    }

    let weighted: f64 = scores.iter().map(|(s, w)| s.score * w).sum();
    weighted / total_weight
}
