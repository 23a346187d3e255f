use crate::filter::{default_filters, FilterPredicate};
use crate::score::{calculate_weighted_score, default_scores, WeightedScore};
use crate::types::{NodeScore, SchedulingContext};
use crate::{Result, SchedulerError};
use stratus_core::{ClusterView, CompatibilityTable, NodeView, ScorerConfig, Workload};
use tracing::debug;

/// Filters and ranks nodes for one workload
///
/// Pure over the [`ClusterView`] it is handed: no I/O, no locks, no
/// randomness. Safe to call from several tasks at once.
pub struct PlacementScorer {
    filters: Vec<Box<dyn FilterPredicate>>,
    scorers: Vec<WeightedScore>,
    compatibility: CompatibilityTable,
    gpu_saturation_percent: f64,
}

impl PlacementScorer {
    /// Build the default pipeline; fails on an invalid compatibility table
    pub fn new(config: &ScorerConfig) -> Result<Self> {
        Ok(Self {
            filters: default_filters(),
            scorers: default_scores(&config.weights),
            compatibility: config.compatibility_table()?,
            gpu_saturation_percent: config.gpu_saturation_percent,
        })
    }

    fn context<'a>(&'a self, workload: &'a Workload, view: &'a ClusterView) -> SchedulingContext<'a> {
        SchedulingContext::new(
            workload,
            view,
            &self.compatibility,
            self.gpu_saturation_percent,
        )
    }

    /// First failing filter's reason, or None if the node is eligible
    fn rejection(&self, context: &SchedulingContext<'_>, node: &NodeView) -> Option<String> {
        for filter in &self.filters {
            let result = filter.filter(context, node);
            if !result.passed {
                let reason = result.reason.unwrap_or_default();
                debug!(
                    "Node {} filtered out by {} for {}: {}",
                    node.id(),
                    filter.name(),
                    context.workload.id,
                    reason
                );
                return Some(reason);
            }
        }
        None
    }

    /// Whether `node_id` passes every filter for the workload
    pub fn is_eligible(&self, workload: &Workload, view: &ClusterView, node_id: &str) -> bool {
        let context = self.context(workload, view);
        view.get(node_id)
            .is_some_and(|node| self.rejection(&context, node).is_none())
    }

    /// Eligible nodes ordered best first
    ///
    /// Ties on the total score go to the lexically smaller node id.
    pub fn score(&self, workload: &Workload, view: &ClusterView) -> Result<Vec<NodeScore>> {
        let context = self.context(workload, view);

        let mut rejections = Vec::new();
        let mut ranked = Vec::new();

        for node in view.nodes() {
            if let Some(reason) = self.rejection(&context, node) {
                rejections.push(format!("{}: {}", node.id(), reason));
                continue;
            }

            let scores: Vec<_> = self
                .scorers
                .iter()
                .map(|weighted| {
                    let result = weighted.function.score(&context, node);
                    debug!(
                        "Node {} {} = {:.1}",
                        node.id(),
                        weighted.function.name(),
                        result.score
                    );
                    (result, weighted.weight)
                })
                .collect();

            ranked.push(NodeScore {
                node_id: node.id().to_string(),
                score: calculate_weighted_score(&scores),
            });
        }

        if ranked.is_empty() {
            let reason = if rejections.is_empty() {
                "no nodes registered".to_string()
            } else {
                rejections.join("; ")
            };
            return Err(SchedulerError::no_eligible_node(&workload.id, reason));
        }

        ranked.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.node_id.cmp(&b.node_id))
        });

        debug!(
            "Workload {} has {} eligible nodes, best {} ({:.1})",
            workload.id,
            ranked.len(),
            ranked[0].node_id,
            ranked[0].score
        );

        Ok(ranked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::*;
    use chrono::{Duration as ChronoDuration, Utc};
    use std::sync::Arc;
    use stratus_collector::{MetricsCollector, StaticMetricsSource};
    use stratus_core::{AffinityClass, CollectorConfig, GpuRequirementMode, ScoreWeights};
    use stratus_metrics::EngineMetrics;

    fn scorer() -> PlacementScorer {
        PlacementScorer::new(&ScorerConfig::default()).unwrap()
    }

    #[test]
    fn test_scenario_a_mandatory_gpu_excludes_gpu_less_node() {
        let store = store_with(vec![
            (node("N1", 4, 8, 0), snapshot(0, 0, vec![])),
            (node("N2", 8, 16, 1), snapshot(0, 0, vec![gpu(0, 0.0, 0, 16)])),
        ]);
        let mut w = gpu_workload("W1", 1, 8, GpuRequirementMode::Mandatory);
        w.requirements.cpu_millicores = 2000;
        w.requirements.memory_bytes = 4 * GIB;

        let ranked = scorer().score(&w, &store.view(Utc::now())).unwrap();
        let ids: Vec<_> = ranked.iter().map(|s| s.node_id.as_str()).collect();
        assert_eq!(ids, vec!["N2"]);
    }

    #[test]
    fn test_scenario_b_affinity_breaks_otherwise_equal_nodes() {
        let store = store_with(vec![
            (
                node("N1", 4, 8, 0).with_affinity(AffinityClass::Coordination),
                snapshot(1000, 2, vec![]),
            ),
            (
                node("N2", 4, 8, 0).with_affinity(AffinityClass::Training),
                snapshot(1000, 2, vec![]),
            ),
        ]);
        let mut w = workload("W", 500, 1);
        w.affinity = vec![AffinityClass::Training];

        let ranked = scorer().score(&w, &store.view(Utc::now())).unwrap();
        assert_eq!(ranked[0].node_id, "N2");
        assert!(ranked[0].score > ranked[1].score);
    }

    #[tokio::test]
    async fn test_scenario_c_unreachable_node_excluded_until_recovery() {
        let config = CollectorConfig::default();
        let store = store_with(vec![(node("N1", 4, 8, 0), snapshot(1000, 2, vec![]))]);
        store.upsert_node(node("N3", 8, 16, 0));

        let source = Arc::new(StaticMetricsSource::new());
        source.set_body(
            "N3",
            "node_cpu_used_millicores 0\nnode_memory_used_bytes 0\n",
        );
        let collector = MetricsCollector::new(
            store.clone(),
            source.clone(),
            Arc::new(EngineMetrics::new().unwrap()),
            config,
        );
        collector.collect_and_record("N3").await.unwrap();

        let w = workload("W", 500, 1);
        let eligible = |store: &stratus_core::SnapshotStore| -> Vec<String> {
            scorer()
                .score(&w, &store.view(Utc::now()))
                .map(|r| r.into_iter().map(|s| s.node_id).collect())
                .unwrap_or_default()
        };
        // Idle N3 ranks first while healthy
        assert_eq!(eligible(&store), vec!["N3", "N1"]);

        source.set_unreachable("N3", "connection refused");
        for _ in 0..3 {
            assert!(collector.collect_and_record("N3").await.is_err());
        }
        assert!(store.health("N3").unwrap().degraded);
        assert_eq!(eligible(&store), vec!["N1"]);

        source.set_body(
            "N3",
            "node_cpu_used_millicores 0\nnode_memory_used_bytes 0\n",
        );
        collector.collect_and_record("N3").await.unwrap();
        assert_eq!(eligible(&store), vec!["N3", "N1"]);
    }

    #[test]
    fn test_stale_nodes_never_eligible() {
        let store = store_with(vec![
            (node("fresh", 4, 8, 0), snapshot(3000, 6, vec![])),
            (node("stale", 64, 256, 0), snapshot(0, 0, vec![])),
        ]);
        let w = workload("W", 500, 1);

        // Only "fresh" reports again before the staleness limit passes
        let now = Utc::now();
        let mut refreshed = snapshot(3000, 6, vec![]);
        refreshed.timestamp = now + ChronoDuration::seconds(61);
        store.record_snapshot("fresh", refreshed).unwrap();

        let later = store.view(now + ChronoDuration::seconds(62));
        let ranked = scorer().score(&w, &later).unwrap();
        assert!(ranked.iter().all(|s| s.node_id != "stale"));
        assert!(!scorer().is_eligible(&w, &later, "stale"));
    }

    #[test]
    fn test_filter_soundness() {
        let store = store_with(vec![
            (node("a", 4, 8, 0), snapshot(3500, 2, vec![])),
            (node("b", 4, 8, 0), snapshot(1000, 7, vec![])),
            (node("c", 4, 8, 0), snapshot(2000, 4, vec![])),
            (node("d", 2, 4, 0), snapshot(0, 0, vec![])),
        ]);
        let view = store.view(Utc::now());
        let w = workload("W", 1500, 2);

        let ranked = scorer().score(&w, &view).unwrap();
        assert!(!ranked.is_empty());
        for entry in &ranked {
            let node = view.get(&entry.node_id).unwrap();
            let snap = view.usable_snapshot(node).unwrap();
            assert!(snap.cpu_headroom(&node.node.capacity) >= w.requirements.cpu_millicores);
            assert!(snap.memory_headroom(&node.node.capacity) >= w.requirements.memory_bytes);
        }
        let ids: Vec<_> = ranked.iter().map(|s| s.node_id.as_str()).collect();
        assert_eq!(ids, vec!["d", "c"]);
    }

    #[test]
    fn test_score_is_deterministic_with_id_tie_break() {
        let store = store_with(vec![
            (node("zeta", 4, 8, 0), snapshot(1000, 2, vec![])),
            (node("alpha", 4, 8, 0), snapshot(1000, 2, vec![])),
            (node("mid", 4, 8, 0), snapshot(1000, 2, vec![])),
        ]);
        let view = store.view(Utc::now());
        let w = workload("W", 500, 1);
        let scorer = scorer();

        let first = scorer.score(&w, &view).unwrap();
        let second = scorer.score(&w, &view).unwrap();
        assert_eq!(first, second);
        let ids: Vec<_> = first.iter().map(|s| s.node_id.as_str()).collect();
        assert_eq!(ids, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_no_eligible_node() {
        let store = store_with(vec![(node("small", 1, 1, 0), snapshot(0, 0, vec![]))]);
        let err = scorer()
            .score(&workload("W", 2000, 2), &store.view(Utc::now()))
            .unwrap_err();
        match err {
            SchedulerError::NoEligibleNode { reason, .. } => {
                assert!(reason.contains("Insufficient CPU"))
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_custom_weights_apply() {
        let config = ScorerConfig {
            weights: ScoreWeights {
                headroom: 0.0,
                affinity: 1.0,
                gpu: 0.0,
            },
            ..ScorerConfig::default()
        };
        let store = store_with(vec![(
            node("n", 4, 8, 0).with_affinity(AffinityClass::Inference),
            snapshot(0, 0, vec![]),
        )]);
        let mut w = workload("W", 100, 1);
        w.affinity = vec![AffinityClass::Training];

        let ranked = PlacementScorer::new(&config)
            .unwrap()
            .score(&w, &store.view(Utc::now()))
            .unwrap();
        assert!((ranked[0].score - 60.0).abs() < 1e-9);
    }
}
