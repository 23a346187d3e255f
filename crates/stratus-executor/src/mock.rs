use crate::api::{BindError, OrchestrationApi};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeSet, VecDeque};
use tracing::debug;

/// Scripted result for the next bind request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockOutcome {
    Success,
    Conflict,
    Timeout,
    Rejected,
    /// Never answer; the executor's own timeout has to fire
    Hang,
}

/// A request seen by the mock, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Bind { workload_id: String, node_id: String },
    Unbind { workload_id: String, node_id: String },
}

#[derive(Default)]
struct MockState {
    bind_script: VecDeque<MockOutcome>,
    unbind_script: VecDeque<MockOutcome>,
    bindings: BTreeSet<(String, String)>,
    calls: Vec<MockCall>,
}

/// In-memory orchestration API
///
/// Binds succeed unless an outcome has been scripted. Keeps the set of
/// (workload, node) bindings it has accepted so tests can inspect placement.
#[derive(Default)]
pub struct MockOrchestrationApi {
    state: Mutex<MockState>,
}

impl MockOrchestrationApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue outcomes consumed by subsequent bind calls
    pub fn script_binds(&self, outcomes: impl IntoIterator<Item = MockOutcome>) {
        self.state.lock().bind_script.extend(outcomes);
    }

    /// Queue outcomes consumed by subsequent unbind calls
    pub fn script_unbinds(&self, outcomes: impl IntoIterator<Item = MockOutcome>) {
        self.state.lock().unbind_script.extend(outcomes);
    }

    /// Nodes the workload is currently bound to
    pub fn nodes_for(&self, workload_id: &str) -> Vec<String> {
        self.state
            .lock()
            .bindings
            .iter()
            .filter(|(w, _)| w == workload_id)
            .map(|(_, n)| n.clone())
            .collect()
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().calls.clone()
    }

    fn failure(outcome: MockOutcome, workload_id: &str, node_id: &str) -> BindError {
        match outcome {
            MockOutcome::Conflict => BindError::conflict(workload_id, node_id, "scripted conflict"),
            MockOutcome::Rejected => BindError::rejected(workload_id, node_id, "scripted rejection"),
            _ => BindError::timeout(workload_id, node_id),
        }
    }
}

#[async_trait]
impl OrchestrationApi for MockOrchestrationApi {
    async fn bind(&self, workload_id: &str, node_id: &str) -> Result<(), BindError> {
        let outcome = {
            let mut state = self.state.lock();
            state.calls.push(MockCall::Bind {
                workload_id: workload_id.to_string(),
                node_id: node_id.to_string(),
            });
            let outcome = state.bind_script.pop_front().unwrap_or(MockOutcome::Success);
            if outcome == MockOutcome::Success {
                state
                    .bindings
                    .insert((workload_id.to_string(), node_id.to_string()));
            }
            outcome
        };

        match outcome {
            MockOutcome::Success => {
                debug!("Mock: bound {} to {}", workload_id, node_id);
                Ok(())
            }
            MockOutcome::Hang => std::future::pending().await,
            other => Err(Self::failure(other, workload_id, node_id)),
        }
    }

    async fn unbind(&self, workload_id: &str, node_id: &str) -> Result<(), BindError> {
        let outcome = {
            let mut state = self.state.lock();
            state.calls.push(MockCall::Unbind {
                workload_id: workload_id.to_string(),
                node_id: node_id.to_string(),
            });
            let outcome = state
                .unbind_script
                .pop_front()
                .unwrap_or(MockOutcome::Success);
            if outcome == MockOutcome::Success
                && !state
                    .bindings
                    .remove(&(workload_id.to_string(), node_id.to_string()))
            {
                return Err(BindError::rejected(
                    workload_id,
                    node_id,
                    "workload is not bound to this node",
                ));
            }
            outcome
        };

        match outcome {
            MockOutcome::Success => {
                debug!("Mock: unbound {} from {}", workload_id, node_id);
                Ok(())
            }
            MockOutcome::Hang => std::future::pending().await,
            other => Err(Self::failure(other, workload_id, node_id)),
        }
    }
}
