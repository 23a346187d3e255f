use crate::affinity::AffinityClass;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Unique, immutable node identifier
pub type NodeId = String;

/// Per-resource totals of a node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capacity {
    /// CPU in millicores
    pub cpu_millicores: u64,
    /// Memory in bytes
    pub memory_bytes: u64,
    /// Number of GPU devices
    pub gpu_count: u32,
    /// Memory per GPU device in bytes
    pub gpu_memory_bytes: u64,
}

/// A compute host in the cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    /// Free-form labels
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Declared role, used for soft affinity scoring only
    #[serde(default)]
    pub affinity_class: Option<AffinityClass>,
    pub capacity: Capacity,
    /// Plain-text exposition endpoint of the node's exporter
    pub metrics_url: String,
}

impl Node {
    pub fn new(id: impl Into<String>, capacity: Capacity, metrics_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tags: BTreeSet::new(),
            affinity_class: None,
            capacity,
            metrics_url: metrics_url.into(),
        }
    }

    /// Builder-style setter for the affinity class
    pub fn with_affinity(mut self, class: AffinityClass) -> Self {
        self.affinity_class = Some(class);
        self
    }

    /// Builder-style tag insertion
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }
}
