use crate::scorer::PlacementScorer;
use crate::types::NodeScore;
use crate::{Result, SchedulerError};
use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use stratus_core::{ClusterView, NodeId, SchedulerLoopConfig, SnapshotStore, StratusError, Workload};
use stratus_executor::{BindingExecutor, ExecutorError};
use stratus_metrics::EngineMetrics;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Workload scheduler
///
/// Each cycle scores every Pending workload against one cluster view and
/// claims the best node before the bind is sent, so a workload is never
/// scored twice at once. Every claim reserves the workload's requests on its
/// node, so later workloads in the cycle see the reduced headroom. Binds run
/// as background tasks.
pub struct Scheduler {
    store: Arc<SnapshotStore>,
    scorer: Arc<PlacementScorer>,
    executor: Arc<BindingExecutor>,
    metrics: Arc<EngineMetrics>,
    config: SchedulerLoopConfig,
}

impl Scheduler {
    /// Create a new scheduler
    pub fn new(
        store: Arc<SnapshotStore>,
        scorer: Arc<PlacementScorer>,
        executor: Arc<BindingExecutor>,
        metrics: Arc<EngineMetrics>,
        config: SchedulerLoopConfig,
    ) -> Self {
        Self {
            store,
            scorer,
            executor,
            metrics,
            config,
        }
    }

    /// Run the scheduler loop until cancelled
    ///
    /// Runs a cycle on every tick and whenever a workload is submitted. Ticks
    /// also prune finished workloads past their retention. On cancellation,
    /// in-flight binds are awaited.
    pub async fn run(self: Arc<Self>, token: CancellationToken) {
        info!(
            "Starting scheduler (cycle every {}s)",
            self.config.cycle().as_secs()
        );

        let submissions = self.executor.submissions();
        let mut interval = tokio::time::interval(self.config.cycle());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut inflight = JoinSet::new();

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => {
                    self.executor.prune_finished();
                }
                _ = submissions.notified() => debug!("Scheduling cycle triggered by submission"),
                Some(joined) = inflight.join_next(), if !inflight.is_empty() => {
                    if let Err(e) = joined {
                        error!("Bind task failed: {}", e);
                    }
                    continue;
                }
            }

            self.schedule_cycle(&mut inflight);
        }

        if !inflight.is_empty() {
            info!("Scheduler stopping, draining {} in-flight binds", inflight.len());
        }
        while let Some(joined) = inflight.join_next().await {
            if let Err(e) = joined {
                error!("Bind task failed: {}", e);
            }
        }
        info!("Scheduler stopped");
    }

    /// Run a single scheduling cycle, returning the number of workloads claimed
    ///
    /// Binds for claimed workloads are spawned onto `inflight`.
    pub fn schedule_cycle(self: &Arc<Self>, inflight: &mut JoinSet<()>) -> usize {
        let pending = self.executor.registry().pending();
        if pending.is_empty() {
            debug!("No pending workloads");
            return 0;
        }

        let mut view = self.store.view(Utc::now());
        self.executor.registry().reserve_unobserved(&mut view);
        debug!(
            "Scheduling {} pending workloads over {} nodes",
            pending.len(),
            view.len()
        );

        let mut claimed = 0;
        for workload in pending {
            match self.try_claim(&workload, &view) {
                Ok(Some(choice)) => {
                    claimed += 1;
                    view.reserve(&choice.node_id, &workload.requirements);
                    let scheduler = Arc::clone(self);
                    inflight.spawn(async move {
                        scheduler.commit_with_rescore(workload, choice).await;
                    });
                }
                Ok(None) => {}
                Err(SchedulerError::NoEligibleNode { reason, .. }) => {
                    self.metrics.scoring_decision("no_eligible_node");
                    warn!(
                        "No eligible node for workload {}, leaving it Pending: {}",
                        workload.id, reason
                    );
                }
                Err(e) => {
                    error!("Failed to schedule workload {}: {}", workload.id, e);
                }
            }
        }

        self.metrics
            .set_pending_workloads(self.executor.registry().pending_count());
        claimed
    }

    /// Score a workload and move it out of Pending onto the best node
    ///
    /// Returns None when the workload left Pending in the meantime.
    fn try_claim(&self, workload: &Workload, view: &ClusterView) -> Result<Option<NodeScore>> {
        let best = self
            .scorer
            .score(workload, view)?
            .into_iter()
            .next()
            .ok_or_else(|| SchedulerError::invariant("Scorer returned an empty ranking"))?;

        match self.executor.claim(&workload.id, &best.node_id) {
            Ok(_) => {
                self.metrics.scoring_decision("placed");
                info!(
                    "Placing workload {} on node {} (score {:.1})",
                    workload.id, best.node_id, best.score
                );
                Ok(Some(best))
            }
            Err(ExecutorError::Core(StratusError::InvalidTransition { .. }))
            | Err(ExecutorError::Core(StratusError::WorkloadNotFound { .. })) => {
                debug!("Workload {} no longer Pending, skipping", workload.id);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Bind a claimed workload, rescoring right away when the node reports a conflict
    ///
    /// Nodes that conflicted are left out of the rescore. Other failures
    /// leave the workload wherever the executor put it.
    async fn commit_with_rescore(&self, workload: Workload, mut choice: NodeScore) {
        let max_rescores = self.executor.config().max_conflict_rescores;
        let mut conflicted: BTreeSet<NodeId> = BTreeSet::new();
        let mut rescores = 0;

        loop {
            let err = match self
                .executor
                .commit(&workload.id, &choice.node_id, choice.score)
                .await
            {
                Ok(()) => return,
                Err(e) => e,
            };

            if !err.is_conflict() || rescores >= max_rescores {
                warn!(
                    "Binding workload {} to node {} failed: {}",
                    workload.id, choice.node_id, err
                );
                return;
            }

            rescores += 1;
            conflicted.insert(choice.node_id.clone());
            let view = self.view_without(&conflicted);

            match self.try_claim(&workload, &view) {
                Ok(Some(next)) => {
                    info!(
                        "Rescored workload {} after conflict on {} (attempt {}/{})",
                        workload.id, choice.node_id, rescores, max_rescores
                    );
                    choice = next;
                }
                Ok(None) => return,
                Err(SchedulerError::NoEligibleNode { reason, .. }) => {
                    self.metrics.scoring_decision("no_eligible_node");
                    warn!(
                        "No node left for workload {} after conflict, leaving it Pending: {}",
                        workload.id, reason
                    );
                    return;
                }
                Err(e) => {
                    error!("Rescoring workload {} failed: {}", workload.id, e);
                    return;
                }
            }
        }
    }

    fn view_without(&self, excluded: &BTreeSet<NodeId>) -> ClusterView {
        let mut view = self.store.view(Utc::now());
        self.executor.registry().reserve_unobserved(&mut view);
        let keep = view
            .nodes()
            .iter()
            .map(|n| n.id().to_string())
            .filter(|id| !excluded.contains(id))
            .collect();
        view.restrict(&keep)
    }
}
