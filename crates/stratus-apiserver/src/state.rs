use std::sync::Arc;
use stratus_core::SnapshotStore;
use stratus_executor::{AuditLog, BindingExecutor, WorkloadRegistry};
use stratus_metrics::EngineMetrics;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Submission, lifecycle and eviction go through the executor
    pub executor: Arc<BindingExecutor>,

    /// Node membership and latest snapshots
    pub store: Arc<SnapshotStore>,

    pub metrics: Arc<EngineMetrics>,
}

impl AppState {
    pub fn new(
        executor: Arc<BindingExecutor>,
        store: Arc<SnapshotStore>,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            executor,
            store,
            metrics,
        }
    }

    pub fn registry(&self) -> &WorkloadRegistry {
        self.executor.registry()
    }

    pub fn audit(&self) -> &AuditLog {
        self.executor.audit()
    }
}
