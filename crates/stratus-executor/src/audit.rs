use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use stratus_core::{NodeId, PlacementDecision, WorkloadId};
use stratus_storage::{KVStore, KeyEncoder, StorageError};
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Bind,
    Unbind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    Success,
    Conflict,
    Timeout,
    Rejected,
}

impl AuditOutcome {
    pub fn from_label(label: &str) -> Self {
        match label {
            "conflict" => Self::Conflict,
            "timeout" => Self::Timeout,
            "rejected" => Self::Rejected,
            _ => Self::Success,
        }
    }
}

/// What triggered the request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditCause {
    /// Initial placement of a pending workload
    Placement,
    /// Rebalancer move
    Rebalance,
    /// Operator eviction
    Eviction,
}

/// Immutable record of one bind or unbind attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    /// Append order, unique and gap-free within one log
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub workload_id: WorkloadId,
    pub node_id: NodeId,
    pub action: AuditAction,
    pub outcome: AuditOutcome,
    pub cause: AuditCause,
    /// Score that led to the decision, for binds
    pub score: Option<f64>,
    /// 1-based attempt number within one bind
    pub attempt: u32,
    pub message: Option<String>,
}

/// Fields supplied by the caller of [`AuditLog::record`]
#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub workload_id: WorkloadId,
    pub node_id: NodeId,
    pub action: AuditAction,
    pub outcome: AuditOutcome,
    pub cause: AuditCause,
    pub score: Option<f64>,
    pub attempt: u32,
    pub message: Option<String>,
}

/// Append-only log of orchestration requests
///
/// Kept in memory for queries and optionally mirrored to a [`KVStore`] so the
/// history (and with it the rebalancer cooldown) survives restarts.
pub struct AuditLog {
    entries: RwLock<Vec<AuditEntry>>,
    store: Option<Arc<dyn KVStore>>,
}

impl AuditLog {
    /// Memory-only log
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            store: None,
        }
    }

    /// Persistent log, loading any entries already in `store`
    pub fn with_store(store: Arc<dyn KVStore>) -> Result<Self, StorageError> {
        let mut entries = Vec::new();
        for (_, value) in store.scan(KeyEncoder::AUDIT_PREFIX.as_bytes())? {
            let entry: AuditEntry = serde_json::from_slice(&value)?;
            entries.push(entry);
        }
        entries.sort_by_key(|e| e.sequence);

        info!("Loaded {} audit entries", entries.len());
        Ok(Self {
            entries: RwLock::new(entries),
            store: Some(store),
        })
    }

    /// Append an entry
    ///
    /// The entry is persisted before it becomes visible; on a storage error
    /// nothing is appended.
    pub fn record(&self, new: NewAuditEntry) -> Result<AuditEntry, StorageError> {
        let mut entries = self.entries.write();
        let sequence = entries.last().map(|e| e.sequence + 1).unwrap_or(0);

        let entry = AuditEntry {
            id: Uuid::new_v4(),
            sequence,
            timestamp: Utc::now(),
            workload_id: new.workload_id,
            node_id: new.node_id,
            action: new.action,
            outcome: new.outcome,
            cause: new.cause,
            score: new.score,
            attempt: new.attempt,
            message: new.message,
        };

        if let Some(store) = &self.store {
            let value = serde_json::to_vec(&entry)?;
            store.append(KeyEncoder::encode_audit_key(sequence).as_bytes(), &value)?;
        }

        debug!(
            "Audit #{}: {:?} {} on {} -> {:?}",
            entry.sequence, entry.action, entry.workload_id, entry.node_id, entry.outcome
        );
        entries.push(entry.clone());
        Ok(entry)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// All entries in append order
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.read().clone()
    }

    pub fn entries_for(&self, workload_id: &str) -> Vec<AuditEntry> {
        self.entries
            .read()
            .iter()
            .filter(|e| e.workload_id == workload_id)
            .cloned()
            .collect()
    }

    /// Time of the workload's most recent successful rebalancer bind
    pub fn last_move_at(&self, workload_id: &str) -> Option<DateTime<Utc>> {
        self.entries
            .read()
            .iter()
            .rev()
            .find(|e| {
                e.workload_id == workload_id
                    && e.cause == AuditCause::Rebalance
                    && e.action == AuditAction::Bind
                    && e.outcome == AuditOutcome::Success
            })
            .map(|e| e.timestamp)
    }

    /// Committed placements, derived from successful binds
    pub fn decisions(&self) -> Vec<PlacementDecision> {
        self.entries
            .read()
            .iter()
            .filter(|e| e.action == AuditAction::Bind && e.outcome == AuditOutcome::Success)
            .map(|e| PlacementDecision {
                workload_id: e.workload_id.clone(),
                node_id: e.node_id.clone(),
                score: e.score.unwrap_or_default(),
                timestamp: e.timestamp,
            })
            .collect()
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratus_storage::RedbBackend;
    use tempfile::tempdir;

    fn bind(workload: &str, node: &str, cause: AuditCause, outcome: AuditOutcome) -> NewAuditEntry {
        NewAuditEntry {
            workload_id: workload.to_string(),
            node_id: node.to_string(),
            action: AuditAction::Bind,
            outcome,
            cause,
            score: Some(70.0),
            attempt: 1,
            message: None,
        }
    }

    #[test]
    fn test_sequence_is_append_order() {
        let log = AuditLog::new();
        let a = log
            .record(bind("w1", "n1", AuditCause::Placement, AuditOutcome::Conflict))
            .unwrap();
        let b = log
            .record(bind("w1", "n2", AuditCause::Placement, AuditOutcome::Success))
            .unwrap();
        assert_eq!(a.sequence, 0);
        assert_eq!(b.sequence, 1);
        assert!(a.timestamp <= b.timestamp);
        assert_eq!(log.entries_for("w1").len(), 2);
        assert!(log.entries_for("w2").is_empty());
    }

    #[test]
    fn test_last_move_only_counts_successful_rebalance_binds() {
        let log = AuditLog::new();
        log.record(bind("w1", "n1", AuditCause::Placement, AuditOutcome::Success))
            .unwrap();
        assert!(log.last_move_at("w1").is_none());

        log.record(bind("w1", "n2", AuditCause::Rebalance, AuditOutcome::Conflict))
            .unwrap();
        assert!(log.last_move_at("w1").is_none());

        let moved = log
            .record(bind("w1", "n2", AuditCause::Rebalance, AuditOutcome::Success))
            .unwrap();
        assert_eq!(log.last_move_at("w1"), Some(moved.timestamp));
    }

    #[test]
    fn test_decisions_from_successful_binds() {
        let log = AuditLog::new();
        log.record(bind("w1", "n1", AuditCause::Placement, AuditOutcome::Timeout))
            .unwrap();
        log.record(bind("w1", "n1", AuditCause::Placement, AuditOutcome::Success))
            .unwrap();

        let decisions = log.decisions();
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].node_id, "n1");
        assert_eq!(decisions[0].score, 70.0);
    }

    #[test]
    fn test_persisted_log_reloads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.redb");

        {
            let store: Arc<dyn KVStore> = Arc::new(RedbBackend::new(&path).unwrap());
            let log = AuditLog::with_store(store).unwrap();
            log.record(bind("w1", "n1", AuditCause::Placement, AuditOutcome::Success))
                .unwrap();
            log.record(bind("w1", "n2", AuditCause::Rebalance, AuditOutcome::Success))
                .unwrap();
        }

        let store: Arc<dyn KVStore> = Arc::new(RedbBackend::new(&path).unwrap());
        let log = AuditLog::with_store(store).unwrap();
        assert_eq!(log.len(), 2);
        assert!(log.last_move_at("w1").is_some());

        let next = log
            .record(bind("w2", "n1", AuditCause::Placement, AuditOutcome::Success))
            .unwrap();
        assert_eq!(next.sequence, 2);
    }
}
