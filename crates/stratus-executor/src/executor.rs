use crate::api::{BindError, OrchestrationApi};
use crate::audit::{AuditAction, AuditCause, AuditLog, AuditOutcome, NewAuditEntry};
use crate::error::{ExecutorError, Result};
use crate::registry::{WorkloadRecord, WorkloadRegistry};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use stratus_core::{BinderConfig, NodeId, Workload, WorkloadState};
use stratus_metrics::EngineMetrics;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

/// Result of a successful rebalancer move
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveOutcome {
    pub workload_id: String,
    pub from: NodeId,
    pub to: NodeId,
    /// Whether the old placement was released. A failed unbind is logged and
    /// audited but does not undo the move.
    pub unbound: bool,
}

/// Commits placement decisions to the orchestration API
///
/// Binds against the same node are serialized; binds against different nodes
/// run concurrently. Every request is written to the audit log.
pub struct BindingExecutor {
    api: Arc<dyn OrchestrationApi>,
    registry: Arc<WorkloadRegistry>,
    audit: Arc<AuditLog>,
    metrics: Arc<EngineMetrics>,
    config: BinderConfig,
    node_locks: Mutex<HashMap<NodeId, Arc<tokio::sync::Mutex<()>>>>,
    submitted: Arc<Notify>,
}

impl BindingExecutor {
    pub fn new(
        api: Arc<dyn OrchestrationApi>,
        registry: Arc<WorkloadRegistry>,
        audit: Arc<AuditLog>,
        metrics: Arc<EngineMetrics>,
        config: BinderConfig,
    ) -> Self {
        Self {
            api,
            registry,
            audit,
            metrics,
            config,
            node_locks: Mutex::new(HashMap::new()),
            submitted: Arc::new(Notify::new()),
        }
    }

    pub fn registry(&self) -> &Arc<WorkloadRegistry> {
        &self.registry
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    pub fn config(&self) -> &BinderConfig {
        &self.config
    }

    /// Signalled whenever a workload is submitted
    pub fn submissions(&self) -> Arc<Notify> {
        self.submitted.clone()
    }

    /// Enqueue a workload as Pending and wake the scheduler
    pub fn submit(&self, workload: Workload) -> Result<WorkloadRecord> {
        let record = self.registry.insert(workload)?;
        info!("Workload {} submitted", record.workload.id);
        self.refresh_pending();
        self.submitted.notify_one();
        Ok(record)
    }

    /// Take a Pending workload out of the queue for binding to `node_id`
    ///
    /// Synchronous so that no second scoring pass can pick up the workload
    /// once this returns.
    pub fn claim(&self, workload_id: &str, node_id: &str) -> Result<WorkloadRecord> {
        let record = self
            .registry
            .transition(workload_id, WorkloadState::Binding, Some(node_id), None)?;
        self.refresh_pending();
        Ok(record)
    }

    /// Bind a claimed workload, applying the retry policy
    ///
    /// - success: Binding -> Bound
    /// - conflict or rejection: Binding -> Pending, error returned at once
    /// - timeout: retried with exponential backoff; after `max_attempts`
    ///   Binding -> Failed
    pub async fn commit(&self, workload_id: &str, node_id: &str, score: f64) -> Result<()> {
        let max_attempts = self.config.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            let result = {
                let lock = self.node_lock(node_id);
                let _guard = lock.lock().await;
                self.call_bind(workload_id, node_id).await
            };
            self.audit_attempt(NewAuditEntry {
                workload_id: workload_id.to_string(),
                node_id: node_id.to_string(),
                action: AuditAction::Bind,
                outcome: outcome_of(&result),
                cause: AuditCause::Placement,
                score: Some(score),
                attempt,
                message: result.as_ref().err().map(|e| e.to_string()),
            });

            match result {
                Ok(()) => {
                    self.metrics.bind_attempt("success");
                    self.metrics.observe_placement_score(score);
                    self.registry
                        .transition(workload_id, WorkloadState::Bound, None, None)?;
                    info!(
                        "Bound workload {} to node {} (score {:.1}, attempt {})",
                        workload_id, node_id, score, attempt
                    );
                    return Ok(());
                }
                Err(err @ BindError::Timeout { .. }) => {
                    self.metrics.bind_attempt(err.outcome());
                    if attempt == max_attempts {
                        error!(
                            "Binding workload {} to node {} timed out {} times, giving up",
                            workload_id, node_id, attempt
                        );
                        self.registry.transition(
                            workload_id,
                            WorkloadState::Failed,
                            None,
                            Some(err.to_string()),
                        )?;
                        return Err(ExecutorError::from_bind(err, attempt));
                    }

                    let delay = self.config.backoff(attempt);
                    warn!(
                        "Bind of {} to {} timed out (attempt {}/{}), retrying in {:?}",
                        workload_id, node_id, attempt, max_attempts, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    self.metrics.bind_attempt(err.outcome());
                    warn!("Bind of {} to {} failed: {}", workload_id, node_id, err);
                    self.registry.transition(
                        workload_id,
                        WorkloadState::Pending,
                        None,
                        Some(err.to_string()),
                    )?;
                    self.refresh_pending();
                    return Err(ExecutorError::from_bind(err, attempt));
                }
            }
        }

        // max_attempts >= 1, so the loop always returns
        Err(ExecutorError::invalid_state(workload_id, "binding", "bind"))
    }

    /// Claim then commit
    pub async fn bind(&self, workload_id: &str, node_id: &str, score: f64) -> Result<()> {
        self.claim(workload_id, node_id)?;
        self.commit(workload_id, node_id, score).await
    }

    /// Relocate a placed workload: bind to `to` first, release the old node after
    ///
    /// A single bind attempt is made; on failure the workload stays where it
    /// is. The two node locks are never held together.
    pub async fn move_workload(&self, workload_id: &str, to: &str, score: f64) -> Result<MoveOutcome> {
        let record = self
            .registry
            .get(workload_id)
            .ok_or_else(|| stratus_core::StratusError::workload_not_found(workload_id))?;
        let from = match (&record.node_id, record.state.is_placed()) {
            (Some(node), true) => node.clone(),
            _ => {
                return Err(ExecutorError::invalid_state(
                    workload_id,
                    record.state.as_str(),
                    "move",
                ))
            }
        };
        if from == to {
            return Err(ExecutorError::invalid_state(
                workload_id,
                format!("already on {}", to),
                "move",
            ));
        }

        let result = {
            let lock = self.node_lock(to);
            let _guard = lock.lock().await;
            self.call_bind(workload_id, to).await
        };
        self.audit_attempt(NewAuditEntry {
            workload_id: workload_id.to_string(),
            node_id: to.to_string(),
            action: AuditAction::Bind,
            outcome: outcome_of(&result),
            cause: AuditCause::Rebalance,
            score: Some(score),
            attempt: 1,
            message: result.as_ref().err().map(|e| e.to_string()),
        });

        if let Err(err) = result {
            self.metrics.bind_attempt(err.outcome());
            warn!(
                "Move of {} from {} to {} failed, workload stays put: {}",
                workload_id, from, to, err
            );
            return Err(ExecutorError::from_bind(err, 1));
        }
        self.metrics.bind_attempt("success");

        if let Err(e) = self.registry.relocate(workload_id, to) {
            // Workload finished or was evicted while the bind was in flight
            warn!("Rolling back move of {} to {}: {}", workload_id, to, e);
            self.release(workload_id, to, AuditCause::Rebalance).await;
            return Err(e.into());
        }
        info!("Moved workload {} from {} to {}", workload_id, from, to);

        let unbound = self.release(workload_id, &from, AuditCause::Rebalance).await;
        Ok(MoveOutcome {
            workload_id: workload_id.to_string(),
            from,
            to: to.to_string(),
            unbound,
        })
    }

    /// Bound -> Running
    pub fn mark_running(&self, workload_id: &str) -> Result<WorkloadRecord> {
        Ok(self
            .registry
            .transition(workload_id, WorkloadState::Running, None, None)?)
    }

    /// Running -> Completed
    pub fn complete(&self, workload_id: &str) -> Result<WorkloadRecord> {
        Ok(self
            .registry
            .transition(workload_id, WorkloadState::Completed, None, None)?)
    }

    /// Bound/Running -> Failed
    pub fn fail(&self, workload_id: &str, reason: impl Into<String>) -> Result<WorkloadRecord> {
        Ok(self.registry.transition(
            workload_id,
            WorkloadState::Failed,
            None,
            Some(reason.into()),
        )?)
    }

    /// Unbind a placed workload and mark it Evicted
    pub async fn evict(&self, workload_id: &str) -> Result<WorkloadRecord> {
        let record = self
            .registry
            .get(workload_id)
            .ok_or_else(|| stratus_core::StratusError::workload_not_found(workload_id))?;
        let node_id = match (&record.node_id, record.state.is_placed()) {
            (Some(node), true) => node.clone(),
            _ => {
                return Err(ExecutorError::invalid_state(
                    workload_id,
                    record.state.as_str(),
                    "evict",
                ))
            }
        };

        let result = {
            let lock = self.node_lock(&node_id);
            let _guard = lock.lock().await;
            self.call_unbind(workload_id, &node_id).await
        };
        self.audit_attempt(NewAuditEntry {
            workload_id: workload_id.to_string(),
            node_id: node_id.clone(),
            action: AuditAction::Unbind,
            outcome: outcome_of(&result),
            cause: AuditCause::Eviction,
            score: None,
            attempt: 1,
            message: result.as_ref().err().map(|e| e.to_string()),
        });

        match result {
            Ok(()) => {
                self.metrics.unbind("success");
                info!("Evicted workload {} from node {}", workload_id, node_id);
                Ok(self
                    .registry
                    .transition(workload_id, WorkloadState::Evicted, None, None)?)
            }
            Err(err) => {
                self.metrics.unbind(err.outcome());
                Err(ExecutorError::from_bind(err, 1))
            }
        }
    }

    /// Unbind `workload_id` from `node_id`, returning whether it succeeded
    async fn release(&self, workload_id: &str, node_id: &str, cause: AuditCause) -> bool {
        let result = {
            let lock = self.node_lock(node_id);
            let _guard = lock.lock().await;
            self.call_unbind(workload_id, node_id).await
        };
        self.audit_attempt(NewAuditEntry {
            workload_id: workload_id.to_string(),
            node_id: node_id.to_string(),
            action: AuditAction::Unbind,
            outcome: outcome_of(&result),
            cause,
            score: None,
            attempt: 1,
            message: result.as_ref().err().map(|e| e.to_string()),
        });

        match result {
            Ok(()) => {
                self.metrics.unbind("success");
                true
            }
            Err(err) => {
                self.metrics.unbind(err.outcome());
                error!(
                    "Failed to unbind workload {} from node {}: {}",
                    workload_id, node_id, err
                );
                false
            }
        }
    }

    async fn call_bind(&self, workload_id: &str, node_id: &str) -> std::result::Result<(), BindError> {
        debug!("Binding {} to {}", workload_id, node_id);
        tokio::time::timeout(self.config.request_timeout(), self.api.bind(workload_id, node_id))
            .await
            .unwrap_or_else(|_| Err(BindError::timeout(workload_id, node_id)))
    }

    async fn call_unbind(
        &self,
        workload_id: &str,
        node_id: &str,
    ) -> std::result::Result<(), BindError> {
        debug!("Unbinding {} from {}", workload_id, node_id);
        tokio::time::timeout(
            self.config.request_timeout(),
            self.api.unbind(workload_id, node_id),
        )
        .await
        .unwrap_or_else(|_| Err(BindError::timeout(workload_id, node_id)))
    }

    fn audit_attempt(&self, entry: NewAuditEntry) {
        let workload_id = entry.workload_id.clone();
        if let Err(e) = self.audit.record(entry) {
            error!("Failed to persist audit entry for {}: {}", workload_id, e);
        }
    }

    /// Drop Completed, Failed and Evicted workloads past the retention window
    pub fn prune_finished(&self) -> usize {
        let cutoff = chrono::Duration::from_std(self.config.retain_finished())
            .ok()
            .and_then(|retain| Utc::now().checked_sub_signed(retain));
        match cutoff {
            Some(cutoff) => self.registry.prune_finished(cutoff),
            None => 0,
        }
    }

    /// Release per-node state once a node leaves the cluster
    pub fn forget_node(&self, node_id: &str) {
        if self.node_locks.lock().remove(node_id).is_some() {
            debug!("Dropped bind lock for node {}", node_id);
        }
    }

    fn node_lock(&self, node_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.node_locks
            .lock()
            .entry(node_id.to_string())
            .or_default()
            .clone()
    }

    fn refresh_pending(&self) {
        self.metrics
            .set_pending_workloads(self.registry.pending_count());
    }
}

fn outcome_of(result: &std::result::Result<(), BindError>) -> AuditOutcome {
    match result {
        Ok(()) => AuditOutcome::Success,
        Err(err) => AuditOutcome::from_label(err.outcome()),
    }
}
