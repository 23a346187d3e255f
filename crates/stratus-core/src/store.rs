use crate::node::{Node, NodeId};
use crate::snapshot::Snapshot;
use crate::workload::ResourceRequirements;
use crate::{Result, StratusError};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Kind of collection failure reported for a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Endpoint could not be reached; the current snapshot is invalidated
    Unreachable,
    /// Endpoint answered with unusable data; the previous snapshot stays in effect
    ParseFailure,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Unreachable => "unreachable",
            FailureKind::ParseFailure => "parse_failure",
        }
    }
}

/// Collection health of a node
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NodeHealth {
    pub consecutive_failures: u32,
    /// Excluded from new placements until a collection succeeds
    pub degraded: bool,
    /// Last collection could not reach the node, so its snapshot is void
    pub unreachable: bool,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

struct NodeEntry {
    node: Arc<Node>,
    snapshot: Option<Arc<Snapshot>>,
    health: NodeHealth,
}

/// Shared Node -> Snapshot association.
///
/// Written only by the metrics collector (and membership changes). Each
/// snapshot is swapped in whole under the write lock, so readers never see a
/// partially written snapshot.
pub struct SnapshotStore {
    entries: RwLock<BTreeMap<NodeId, NodeEntry>>,
    staleness: Duration,
    degraded_after: u32,
}

impl SnapshotStore {
    /// Create an empty store
    ///
    /// `staleness` is the maximum snapshot age usable for scoring and
    /// `degraded_after` the number of consecutive failures that flag a node.
    pub fn new(staleness: Duration, degraded_after: u32) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            staleness,
            degraded_after: degraded_after.max(1),
        }
    }

    pub fn staleness(&self) -> Duration {
        self.staleness
    }

    /// Register a node, or replace its definition while keeping observed state
    pub fn upsert_node(&self, node: Node) {
        let mut entries = self.entries.write();
        match entries.get_mut(&node.id) {
            Some(entry) => {
                debug!("Updating node definition: {}", node.id);
                entry.node = Arc::new(node);
            }
            None => {
                info!("Node joined: {}", node.id);
                entries.insert(
                    node.id.clone(),
                    NodeEntry {
                        node: Arc::new(node),
                        snapshot: None,
                        health: NodeHealth::default(),
                    },
                );
            }
        }
    }

    /// Remove a node and everything observed about it
    pub fn remove_node(&self, node_id: &str) -> Option<Node> {
        let removed = self.entries.write().remove(node_id);
        if removed.is_some() {
            info!("Node left: {}", node_id);
        }
        removed.map(|entry| Arc::unwrap_or_clone(entry.node))
    }

    pub fn node(&self, node_id: &str) -> Option<Arc<Node>> {
        self.entries.read().get(node_id).map(|e| e.node.clone())
    }

    /// All registered nodes, ordered by id
    pub fn nodes(&self) -> Vec<Arc<Node>> {
        self.entries.read().values().map(|e| e.node.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn snapshot(&self, node_id: &str) -> Option<Arc<Snapshot>> {
        self.entries
            .read()
            .get(node_id)
            .and_then(|e| e.snapshot.clone())
    }

    pub fn health(&self, node_id: &str) -> Option<NodeHealth> {
        self.entries.read().get(node_id).map(|e| e.health.clone())
    }

    /// Replace a node's snapshot after a successful collection
    pub fn record_snapshot(&self, node_id: &str, snapshot: Snapshot) -> Result<()> {
        let mut entries = self.entries.write();
        let entry = entries
            .get_mut(node_id)
            .ok_or_else(|| StratusError::node_not_found(node_id))?;

        if entry.health.degraded {
            info!("Node {} recovered after {} failures", node_id, entry.health.consecutive_failures);
        }

        entry.health = NodeHealth {
            consecutive_failures: 0,
            degraded: false,
            unreachable: false,
            last_success: Some(snapshot.timestamp),
            last_error: None,
        };
        entry.snapshot = Some(Arc::new(snapshot));

        Ok(())
    }

    /// Count a failed collection and return the updated health
    pub fn record_failure(
        &self,
        node_id: &str,
        kind: FailureKind,
        message: impl Into<String>,
    ) -> Result<NodeHealth> {
        let mut entries = self.entries.write();
        let entry = entries
            .get_mut(node_id)
            .ok_or_else(|| StratusError::node_not_found(node_id))?;

        let health = &mut entry.health;
        health.consecutive_failures = health.consecutive_failures.saturating_add(1);
        health.last_error = Some(message.into());
        if kind == FailureKind::Unreachable {
            health.unreachable = true;
        }

        if !health.degraded && health.consecutive_failures >= self.degraded_after {
            warn!(
                "Node {} flagged degraded after {} consecutive collection failures",
                node_id, health.consecutive_failures
            );
            health.degraded = true;
        }

        Ok(health.clone())
    }

    /// Immutable point-in-time view for scoring and rebalancing
    pub fn view(&self, now: DateTime<Utc>) -> ClusterView {
        let nodes = self
            .entries
            .read()
            .values()
            .map(|entry| NodeView {
                node: entry.node.clone(),
                snapshot: entry.snapshot.clone(),
                health: entry.health.clone(),
            })
            .collect();

        ClusterView {
            now,
            staleness: self.staleness,
            nodes,
            reservations: BTreeMap::new(),
        }
    }
}

/// Resources promised to placements a node's snapshot does not show yet
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Reservation {
    pub cpu_millicores: u64,
    pub memory_bytes: u64,
    pub gpu_count: u32,
}

impl Reservation {
    pub fn add(&mut self, requirements: &ResourceRequirements) {
        self.cpu_millicores = self.cpu_millicores.saturating_add(requirements.cpu_millicores);
        self.memory_bytes = self.memory_bytes.saturating_add(requirements.memory_bytes);
        self.gpu_count = self.gpu_count.saturating_add(requirements.gpu_count);
    }
}

/// One node as seen by a [`ClusterView`]
#[derive(Debug, Clone)]
pub struct NodeView {
    pub node: Arc<Node>,
    pub snapshot: Option<Arc<Snapshot>>,
    pub health: NodeHealth,
}

impl NodeView {
    pub fn id(&self) -> &str {
        &self.node.id
    }
}

/// Set of nodes and snapshots captured at `now`
///
/// Nodes and snapshots never change once captured. Reservations are layered
/// on top so that placements made from this view count against the nodes
/// they land on.
#[derive(Debug, Clone)]
pub struct ClusterView {
    now: DateTime<Utc>,
    staleness: Duration,
    nodes: Vec<NodeView>,
    reservations: BTreeMap<NodeId, Reservation>,
}

impl ClusterView {
    pub fn new(now: DateTime<Utc>, staleness: Duration, mut nodes: Vec<NodeView>) -> Self {
        nodes.sort_by(|a, b| a.node.id.cmp(&b.node.id));
        Self {
            now,
            staleness,
            nodes,
            reservations: BTreeMap::new(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn staleness(&self) -> Duration {
        self.staleness
    }

    /// Nodes ordered by id
    pub fn nodes(&self) -> &[NodeView] {
        &self.nodes
    }

    pub fn get(&self, node_id: &str) -> Option<&NodeView> {
        self.nodes.iter().find(|n| n.node.id == node_id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The snapshot usable for decisions, or None when the node is degraded,
    /// unreachable, never observed, or stale
    pub fn usable_snapshot<'a>(&self, view: &'a NodeView) -> Option<&'a Snapshot> {
        if view.health.degraded || view.health.unreachable {
            return None;
        }
        view.snapshot
            .as_deref()
            .filter(|snap| !snap.is_stale(self.now, self.staleness))
    }

    /// Count `requirements` against `node_id` on top of its snapshot
    pub fn reserve(&mut self, node_id: &str, requirements: &ResourceRequirements) {
        self.reservations
            .entry(node_id.to_string())
            .or_default()
            .add(requirements);
    }

    /// Resources reserved on a node; zero when nothing is pending on it
    pub fn reserved(&self, node_id: &str) -> Reservation {
        self.reservations
            .get(node_id)
            .copied()
            .unwrap_or_default()
    }

    /// Copy of this view limited to the given node ids
    pub fn restrict(&self, node_ids: &BTreeSet<NodeId>) -> ClusterView {
        ClusterView {
            now: self.now,
            staleness: self.staleness,
            nodes: self
                .nodes
                .iter()
                .filter(|n| node_ids.contains(&n.node.id))
                .cloned()
                .collect(),
            reservations: self
                .reservations
                .iter()
                .filter(|(id, _)| node_ids.contains(*id))
                .map(|(id, r)| (id.clone(), *r))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Capacity;

    fn store() -> SnapshotStore {
        SnapshotStore::new(Duration::from_secs(60), 3)
    }

    fn node(id: &str) -> Node {
        Node::new(
            id,
            Capacity {
                cpu_millicores: 4000,
                memory_bytes: 8 << 30,
                gpu_count: 0,
                gpu_memory_bytes: 0,
            },
            format!("http://{}:9100/metrics", id),
        )
    }

    fn snapshot(at: DateTime<Utc>) -> Snapshot {
        Snapshot {
            timestamp: at,
            cpu_used_millicores: 1000,
            memory_used_bytes: 1 << 30,
            gpu_devices: vec![],
        }
    }

    #[test]
    fn test_record_snapshot_requires_known_node() {
        let store = store();
        assert!(store.record_snapshot("ghost", snapshot(Utc::now())).is_err());
    }

    #[test]
    fn test_degraded_after_consecutive_failures() {
        let store = store();
        store.upsert_node(node("n3"));
        store.record_snapshot("n3", snapshot(Utc::now())).unwrap();

        for expected in 1..=2 {
            let health = store
                .record_failure("n3", FailureKind::ParseFailure, "garbage")
                .unwrap();
            assert_eq!(health.consecutive_failures, expected);
            assert!(!health.degraded);
        }

        let health = store
            .record_failure("n3", FailureKind::ParseFailure, "garbage")
            .unwrap();
        assert!(health.degraded);

        store.record_snapshot("n3", snapshot(Utc::now())).unwrap();
        let health = store.health("n3").unwrap();
        assert!(!health.degraded);
        assert_eq!(health.consecutive_failures, 0);
    }

    #[test]
    fn test_unreachable_invalidates_snapshot_immediately() {
        let store = store();
        store.upsert_node(node("n1"));
        let now = Utc::now();
        store.record_snapshot("n1", snapshot(now)).unwrap();

        let view = store.view(now);
        assert!(view.usable_snapshot(&view.nodes()[0]).is_some());

        store
            .record_failure("n1", FailureKind::Unreachable, "connection refused")
            .unwrap();
        let view = store.view(now);
        assert!(view.usable_snapshot(&view.nodes()[0]).is_none());
    }

    #[test]
    fn test_parse_failure_keeps_previous_snapshot_until_stale() {
        let store = store();
        store.upsert_node(node("n1"));
        let taken = Utc::now();
        store.record_snapshot("n1", snapshot(taken)).unwrap();
        store
            .record_failure("n1", FailureKind::ParseFailure, "bad line")
            .unwrap();

        let view = store.view(taken + chrono::Duration::seconds(30));
        assert!(view.usable_snapshot(&view.nodes()[0]).is_some());

        let view = store.view(taken + chrono::Duration::seconds(61));
        assert!(view.usable_snapshot(&view.nodes()[0]).is_none());
    }

    #[test]
    fn test_upsert_keeps_observed_state() {
        let store = store();
        store.upsert_node(node("n1"));
        store.record_snapshot("n1", snapshot(Utc::now())).unwrap();
        store.upsert_node(node("n1").with_tag("rack-a"));

        assert!(store.snapshot("n1").is_some());
        assert!(store.node("n1").unwrap().tags.contains("rack-a"));
        assert!(store.remove_node("n1").is_some());
        assert!(store.is_empty());
    }

    #[test]
    fn test_view_ordered_and_restricted() {
        let store = store();
        for id in ["n3", "n1", "n2"] {
            store.upsert_node(node(id));
        }
        let view = store.view(Utc::now());
        let ids: Vec<&str> = view.nodes().iter().map(|n| n.id()).collect();
        assert_eq!(ids, vec!["n1", "n2", "n3"]);

        let keep: BTreeSet<NodeId> = ["n2".to_string()].into_iter().collect();
        assert_eq!(view.restrict(&keep).len(), 1);
    }

    #[test]
    fn test_reservations_accumulate_and_survive_restrict() {
        let store = store();
        for id in ["n1", "n2"] {
            store.upsert_node(node(id));
        }
        let mut view = store.view(Utc::now());
        assert_eq!(view.reserved("n1"), Reservation::default());

        let requirements = ResourceRequirements {
            cpu_millicores: 3000,
            memory_bytes: 1 << 30,
            gpu_count: 1,
            min_gpu_memory_bytes: 0,
        };
        view.reserve("n1", &requirements);
        view.reserve("n1", &requirements);
        view.reserve("n2", &requirements);

        let reserved = view.reserved("n1");
        assert_eq!(reserved.cpu_millicores, 6000);
        assert_eq!(reserved.memory_bytes, 2 << 30);
        assert_eq!(reserved.gpu_count, 2);

        let keep: BTreeSet<NodeId> = ["n1".to_string()].into_iter().collect();
        let restricted = view.restrict(&keep);
        assert_eq!(restricted.reserved("n1"), reserved);
        assert_eq!(restricted.reserved("n2"), Reservation::default());
    }
}
