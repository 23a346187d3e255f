use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use stratus_core::{
    ClusterView, NodeId, Result, StratusError, Workload, WorkloadId, WorkloadState,
};
use tracing::{debug, info};

/// A workload and everything the engine tracks about it
#[derive(Debug, Clone, Serialize)]
pub struct WorkloadRecord {
    pub workload: Workload,
    pub state: WorkloadState,
    /// Node the workload is bound to, or being bound to while `Binding`
    pub node_id: Option<NodeId>,
    pub submitted_at: DateTime<Utc>,
    /// Time of the bind that put the workload on its current node
    pub bound_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub last_error: Option<String>,
    #[serde(skip)]
    sequence: u64,
}

#[derive(Default)]
struct RegistryInner {
    records: HashMap<WorkloadId, WorkloadRecord>,
    next_sequence: u64,
}

/// All submitted workloads and their lifecycle state
///
/// Reads are public. State changes go through `BindingExecutor`, which is the
/// only component allowed to move a workload out of `Pending`.
#[derive(Default)]
pub struct WorkloadRegistry {
    inner: RwLock<RegistryInner>,
}

impl WorkloadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, workload_id: &str) -> Option<WorkloadRecord> {
        self.inner.read().records.get(workload_id).cloned()
    }

    /// All workloads in submission order
    pub fn list(&self) -> Vec<WorkloadRecord> {
        let mut records: Vec<_> = self.inner.read().records.values().cloned().collect();
        records.sort_by_key(|r| r.sequence);
        records
    }

    /// Pending workloads, oldest submission first
    pub fn pending(&self) -> Vec<Workload> {
        let inner = self.inner.read();
        let mut pending: Vec<_> = inner
            .records
            .values()
            .filter(|r| r.state == WorkloadState::Pending)
            .collect();
        pending.sort_by_key(|r| r.sequence);
        pending.into_iter().map(|r| r.workload.clone()).collect()
    }

    pub fn pending_count(&self) -> usize {
        self.inner
            .read()
            .records
            .values()
            .filter(|r| r.state == WorkloadState::Pending)
            .count()
    }

    /// Workloads currently bound or running on `node_id`
    pub fn placed_on(&self, node_id: &str) -> Vec<WorkloadRecord> {
        let inner = self.inner.read();
        let mut placed: Vec<_> = inner
            .records
            .values()
            .filter(|r| r.state.is_placed() && r.node_id.as_deref() == Some(node_id))
            .cloned()
            .collect();
        placed.sort_by_key(|r| r.sequence);
        placed
    }

    /// Reserve the requests of placements `view` cannot see yet
    ///
    /// A `Binding` workload always counts against its node. A bound or
    /// running one counts until the node reports a snapshot taken after the
    /// bind.
    pub fn reserve_unobserved(&self, view: &mut ClusterView) {
        let inner = self.inner.read();
        for record in inner.records.values() {
            let Some(node_id) = record.node_id.as_deref() else {
                continue;
            };
            let observed_at = view
                .get(node_id)
                .and_then(|n| n.snapshot.as_ref())
                .map(|s| s.timestamp);

            let unobserved = match record.state {
                WorkloadState::Binding => true,
                WorkloadState::Bound | WorkloadState::Running => {
                    match (record.bound_at, observed_at) {
                        (Some(bound_at), Some(observed_at)) => bound_at >= observed_at,
                        _ => true,
                    }
                }
                _ => false,
            };

            if unobserved {
                view.reserve(node_id, &record.workload.requirements);
            }
        }
    }

    /// Drop finished workloads whose last transition is older than `cutoff`
    ///
    /// Returns how many records were removed.
    pub fn prune_finished(&self, cutoff: DateTime<Utc>) -> usize {
        let mut inner = self.inner.write();
        let before = inner.records.len();
        inner
            .records
            .retain(|_, r| !(r.state.is_terminal() && r.updated_at < cutoff));
        let pruned = before - inner.records.len();
        if pruned > 0 {
            info!("Pruned {} finished workloads", pruned);
        }
        pruned
    }

    pub(crate) fn insert(&self, workload: Workload) -> Result<WorkloadRecord> {
        workload.validate()?;

        let mut inner = self.inner.write();
        if inner.records.contains_key(&workload.id) {
            return Err(StratusError::workload_already_exists(&workload.id));
        }

        let now = Utc::now();
        let sequence = inner.next_sequence;
        inner.next_sequence += 1;

        let record = WorkloadRecord {
            workload,
            state: WorkloadState::Pending,
            node_id: None,
            submitted_at: now,
            bound_at: None,
            updated_at: now,
            last_error: None,
            sequence,
        };
        inner
            .records
            .insert(record.workload.id.clone(), record.clone());
        Ok(record)
    }

    /// Apply one state machine edge
    ///
    /// `node_id` is recorded when entering `Binding`; it is cleared when the
    /// workload falls back to `Pending`. `bound_at` is set on entering `Bound`.
    pub(crate) fn transition(
        &self,
        workload_id: &str,
        to: WorkloadState,
        node_id: Option<&str>,
        error: Option<String>,
    ) -> Result<WorkloadRecord> {
        let mut inner = self.inner.write();
        let record = inner
            .records
            .get_mut(workload_id)
            .ok_or_else(|| StratusError::workload_not_found(workload_id))?;

        if !record.state.can_transition_to(to) {
            return Err(StratusError::invalid_transition(
                workload_id,
                record.state.as_str(),
                to.as_str(),
            ));
        }

        let now = Utc::now();
        debug!("Workload {}: {} -> {}", workload_id, record.state, to);
        record.state = to;
        record.updated_at = now;
        record.last_error = error;

        match to {
            WorkloadState::Binding => record.node_id = node_id.map(str::to_string),
            WorkloadState::Pending => record.node_id = None,
            WorkloadState::Bound => record.bound_at = Some(now),
            _ => {}
        }

        Ok(record.clone())
    }

    /// Point a placed workload at a new node after a successful move
    pub(crate) fn relocate(&self, workload_id: &str, node_id: &str) -> Result<WorkloadRecord> {
        let mut inner = self.inner.write();
        let record = inner
            .records
            .get_mut(workload_id)
            .ok_or_else(|| StratusError::workload_not_found(workload_id))?;

        if !record.state.is_placed() {
            return Err(StratusError::invalid_transition(
                workload_id,
                record.state.as_str(),
                "relocated",
            ));
        }

        let now = Utc::now();
        record.node_id = Some(node_id.to_string());
        record.bound_at = Some(now);
        record.updated_at = now;
        Ok(record.clone())
    }
}
