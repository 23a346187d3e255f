//! Stratus Core - Fundamental types for the Stratus scheduling engine
//!
//! This crate provides:
//! - Node, Snapshot, Workload and PlacementDecision types
//! - Affinity classes and the affinity compatibility table
//! - Resource quantity parsing
//! - The shared node snapshot store
//! - Engine configuration and validation
//! - Error types with miette diagnostics

pub mod affinity;
pub mod config;
pub mod error;
pub mod node;
pub mod resources;
pub mod snapshot;
pub mod store;
pub mod workload;

// Re-export commonly used types
pub use affinity::{AffinityClass, CompatibilityEntry, CompatibilityTable};
pub use config::{
    BinderConfig, CollectorConfig, EngineConfig, NodeSpec, RebalancerConfig, ScoreWeights,
    SchedulerLoopConfig, ScorerConfig,
};
pub use error::{Result, StratusError};
pub use node::{Capacity, Node, NodeId};
pub use resources::ResourceQuantities;
pub use snapshot::{GpuDevice, Snapshot};
pub use store::{ClusterView, FailureKind, NodeHealth, NodeView, Reservation, SnapshotStore};
pub use workload::{
    GpuRequirementMode, PlacementDecision, ResourceRequirements, Workload, WorkloadId,
    WorkloadState,
};
