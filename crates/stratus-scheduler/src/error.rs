// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Scheduler error type
#[derive(Error, Debug, Diagnostic)]
pub enum SchedulerError {
    /// Every node was filtered out
    #[error("No eligible node for workload {workload_id}")]
    #[diagnostic(
        code(stratus::scheduler::no_eligible_node),
        help("The workload stays Pending and is retried next cycle. Filter reasons: {reason}")
    )]
    NoEligibleNode {
        #[allow(unused)]
        workload_id: String,
        #[allow(unused)]
        reason: String,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Executor(#[from] stratus_executor::ExecutorError),

    /// Bad scorer configuration, or a model error surfaced while scoring
    #[error(transparent)]
    #[diagnostic(transparent)]
    Core(#[from] stratus_core::StratusError),

    /// The scorer broke one of its own guarantees
    #[error("Scheduler invariant violated: {message}")]
    #[diagnostic(
        code(stratus::scheduler::invariant),
        help("This is a bug in the placement pipeline. Please report it with the audit trail")
    )]
    Invariant {
        #[allow(unused)]
        message: String,
    },
}

/// Result type for scheduler operations
pub type Result<T> = std::result::Result<T, SchedulerError>;

impl SchedulerError {
    pub fn no_eligible_node(workload_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::NoEligibleNode {
            workload_id: workload_id.into(),
            reason: reason.into(),
        }
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        Self::Invariant {
            message: message.into(),
        }
    }
}
