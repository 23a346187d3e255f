use crate::scorer::PlacementScorer;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use stratus_core::{NodeId, NodeView, RebalancerConfig, Snapshot, SnapshotStore};
use stratus_executor::{BindingExecutor, MoveOutcome, WorkloadRecord};
use stratus_metrics::EngineMetrics;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dimension {
    Cpu,
    Memory,
    Gpu,
}

impl Dimension {
    const ALL: [Dimension; 3] = [Dimension::Cpu, Dimension::Memory, Dimension::Gpu];

    fn as_str(&self) -> &'static str {
        match self {
            Dimension::Cpu => "cpu",
            Dimension::Memory => "memory",
            Dimension::Gpu => "gpu",
        }
    }
}

/// Utilization of one node, in percent
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeLoad {
    pub node_id: NodeId,
    pub cpu: f64,
    pub memory: f64,
    /// Mean over devices; None for nodes without GPUs
    pub gpu: Option<f64>,
}

impl NodeLoad {
    fn of(node: &NodeView, snapshot: &Snapshot) -> Self {
        let capacity = &node.node.capacity;
        Self {
            node_id: node.id().to_string(),
            cpu: snapshot.cpu_utilization(capacity) * 100.0,
            memory: snapshot.memory_utilization(capacity) * 100.0,
            gpu: snapshot.gpu_utilization().map(|u| u * 100.0),
        }
    }

    fn value(&self, dimension: Dimension) -> Option<f64> {
        match dimension {
            Dimension::Cpu => Some(self.cpu),
            Dimension::Memory => Some(self.memory),
            Dimension::Gpu => self.gpu,
        }
    }
}

/// What one rebalancer tick saw and did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RebalanceReport {
    /// Loads of every node with a usable snapshot
    pub loads: Vec<NodeLoad>,
    /// Nodes above average + threshold in some dimension
    pub hot: Vec<NodeId>,
    /// Nodes below average - threshold in some dimension
    pub cold: Vec<NodeId>,
    pub moved: Vec<MoveOutcome>,
    pub failed: usize,
    pub skipped_cooldown: usize,
    pub no_target: usize,
}

struct Classified {
    load: NodeLoad,
    hot: Vec<Dimension>,
    cold: Vec<Dimension>,
}

/// Moves workloads off nodes running hotter than the cluster average
///
/// Runs as a single periodic task. A tick that finds the previous one still
/// running is skipped, never queued.
pub struct Rebalancer {
    store: Arc<SnapshotStore>,
    scorer: Arc<PlacementScorer>,
    executor: Arc<BindingExecutor>,
    metrics: Arc<EngineMetrics>,
    config: RebalancerConfig,
    running: AtomicBool,
    hot_streaks: Mutex<HashMap<NodeId, u32>>,
}

/// Clears the running flag when a tick ends, however it ends
struct TickGuard<'a>(&'a AtomicBool);

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Rebalancer {
    pub fn new(
        store: Arc<SnapshotStore>,
        scorer: Arc<PlacementScorer>,
        executor: Arc<BindingExecutor>,
        metrics: Arc<EngineMetrics>,
        config: RebalancerConfig,
    ) -> Self {
        Self {
            store,
            scorer,
            executor,
            metrics,
            config,
            running: AtomicBool::new(false),
            hot_streaks: Mutex::new(HashMap::new()),
        }
    }

    /// Tick until cancelled, then wait for a running tick to finish
    pub async fn run(self: Arc<Self>, token: CancellationToken) {
        let period = self.config.tick();
        info!(
            "Starting rebalancer (every {}s, threshold {}pts, cooldown {}s)",
            period.as_secs(),
            self.config.threshold_percent,
            self.config.cooldown().as_secs()
        );

        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut ticks = JoinSet::new();

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => {
                    let rebalancer = Arc::clone(&self);
                    ticks.spawn(async move {
                        rebalancer.tick().await;
                    });
                }
                Some(joined) = ticks.join_next(), if !ticks.is_empty() => {
                    if let Err(e) = joined {
                        error!("Rebalancer tick failed: {}", e);
                    }
                }
            }
        }

        while let Some(joined) = ticks.join_next().await {
            if let Err(e) = joined {
                error!("Rebalancer tick failed: {}", e);
            }
        }
        info!("Rebalancer stopped");
    }

    /// Run one tick now; None if the previous tick is still running
    pub async fn tick(&self) -> Option<RebalanceReport> {
        self.tick_at(Utc::now()).await
    }

    /// Run one tick as of `now`
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Option<RebalanceReport> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("Previous rebalancer tick still running, skipping this one");
            self.metrics.rebalance_tick_skipped();
            return None;
        }
        let _guard = TickGuard(&self.running);

        let report = self.rebalance(now).await;
        if !report.moved.is_empty() || report.failed > 0 {
            info!(
                "Rebalance tick: {} moved, {} failed, {} in cooldown, {} without target",
                report.moved.len(),
                report.failed,
                report.skipped_cooldown,
                report.no_target
            );
        }
        Some(report)
    }

    async fn rebalance(&self, now: DateTime<Utc>) -> RebalanceReport {
        let mut view = self.store.view(now);
        self.executor.registry().reserve_unobserved(&mut view);
        let loads: Vec<NodeLoad> = view
            .nodes()
            .iter()
            .filter_map(|node| view.usable_snapshot(node).map(|snap| NodeLoad::of(node, snap)))
            .collect();

        let mut report = RebalanceReport::default();
        if loads.len() < 2 {
            debug!("Fewer than two nodes with usable snapshots, nothing to balance");
            self.hot_streaks.lock().clear();
            report.loads = loads;
            return report;
        }

        let classified = self.classify(&loads);
        report.loads = loads;
        report.hot = classified
            .iter()
            .filter(|c| !c.hot.is_empty())
            .map(|c| c.load.node_id.clone())
            .collect();
        report.cold = classified
            .iter()
            .filter(|c| !c.cold.is_empty())
            .map(|c| c.load.node_id.clone())
            .collect();

        let sources = self.sustained_hot(&classified);
        let mut used_targets: BTreeSet<NodeId> = BTreeSet::new();

        for source in classified.iter().filter(|c| sources.contains(&c.load.node_id)) {
            let source_id = &source.load.node_id;
            let candidate = match self.newest_movable(source_id) {
                Some(record) => record,
                None => {
                    debug!("Hot node {} has no movable workload", source_id);
                    continue;
                }
            };
            let workload_id = candidate.workload.id.clone();

            if self.in_cooldown(&workload_id, now) {
                debug!(
                    "Workload {} on hot node {} moved recently, skipping",
                    workload_id, source_id
                );
                report.skipped_cooldown += 1;
                self.metrics.rebalance_move("skipped_cooldown");
                continue;
            }

            let targets: BTreeSet<NodeId> = classified
                .iter()
                .filter(|c| {
                    c.load.node_id != *source_id
                        && c.hot.is_empty()
                        && c.cold.iter().any(|d| source.hot.contains(d))
                        && !used_targets.contains(&c.load.node_id)
                })
                .map(|c| c.load.node_id.clone())
                .collect();

            let best = if targets.is_empty() {
                None
            } else {
                match self.scorer.score(&candidate.workload, &view.restrict(&targets)) {
                    Ok(ranked) => ranked.into_iter().next(),
                    Err(e) => {
                        debug!("No cold node fits workload {}: {}", workload_id, e);
                        None
                    }
                }
            };
            let best = match best {
                Some(best) => best,
                None => {
                    report.no_target += 1;
                    self.metrics.rebalance_move("no_target");
                    continue;
                }
            };

            info!(
                "Node {} is hot ({}), moving workload {} to {} (score {:.1})",
                source_id,
                source
                    .hot
                    .iter()
                    .map(|d| d.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
                workload_id,
                best.node_id,
                best.score
            );

            match self
                .executor
                .move_workload(&workload_id, &best.node_id, best.score)
                .await
            {
                Ok(outcome) => {
                    self.metrics.rebalance_move("moved");
                    view.reserve(&best.node_id, &candidate.workload.requirements);
                    used_targets.insert(best.node_id.clone());
                    self.hot_streaks.lock().remove(source_id);
                    report.moved.push(outcome);
                }
                Err(e) => {
                    // Not retried until the next tick
                    warn!(
                        "Failed to move workload {} from {} to {}: {}",
                        workload_id, source_id, best.node_id, e
                    );
                    self.metrics.rebalance_move("failed");
                    report.failed += 1;
                }
            }
        }

        report
    }

    /// Flag dimensions in which each node deviates from the cluster average
    fn classify(&self, loads: &[NodeLoad]) -> Vec<Classified> {
        let threshold = self.config.threshold_percent;
        let averages: Vec<(Dimension, Option<f64>)> = Dimension::ALL
            .iter()
            .map(|&d| {
                let values: Vec<f64> = loads.iter().filter_map(|l| l.value(d)).collect();
                let average = if values.is_empty() {
                    None
                } else {
                    Some(values.iter().sum::<f64>() / values.len() as f64)
                };
                (d, average)
            })
            .collect();

        loads
            .iter()
            .map(|load| {
                let mut hot = Vec::new();
                let mut cold = Vec::new();
                for &(dimension, average) in &averages {
                    let (Some(value), Some(average)) = (load.value(dimension), average) else {
                        continue;
                    };
                    if value > average + threshold {
                        hot.push(dimension);
                    } else if value < average - threshold {
                        cold.push(dimension);
                    }
                }
                Classified {
                    load: load.clone(),
                    hot,
                    cold,
                }
            })
            .collect()
    }

    /// Hot nodes that have been hot for enough consecutive ticks
    fn sustained_hot(&self, classified: &[Classified]) -> BTreeSet<NodeId> {
        let required = self.config.hot_ticks_required.max(1);
        let mut streaks = self.hot_streaks.lock();
        streaks.retain(|id, _| {
            classified
                .iter()
                .any(|c| c.load.node_id == *id && !c.hot.is_empty())
        });

        let mut sustained = BTreeSet::new();
        for c in classified.iter().filter(|c| !c.hot.is_empty()) {
            let streak = streaks.entry(c.load.node_id.clone()).or_insert(0);
            *streak = streak.saturating_add(1);
            if *streak >= required {
                sustained.insert(c.load.node_id.clone());
            } else {
                debug!(
                    "Node {} hot for {}/{} ticks",
                    c.load.node_id, streak, required
                );
            }
        }
        sustained
    }

    /// Most recently bound movable workload on the node
    fn newest_movable(&self, node_id: &str) -> Option<WorkloadRecord> {
        self.executor
            .registry()
            .placed_on(node_id)
            .into_iter()
            .filter(|r| r.workload.movable)
            .max_by(|a, b| {
                a.bound_at
                    .cmp(&b.bound_at)
                    .then_with(|| a.workload.id.cmp(&b.workload.id))
            })
    }

    fn in_cooldown(&self, workload_id: &str, now: DateTime<Utc>) -> bool {
        match self.executor.audit().last_move_at(workload_id) {
            // A move stamped after `now` counts as recent
            Some(last) => (now - last)
                .to_std()
                .map_or(true, |elapsed| elapsed < self.config.cooldown()),
            None => false,
        }
    }
}
