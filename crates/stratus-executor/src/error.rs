// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use crate::api::BindError;
use miette::Diagnostic;
use thiserror::Error;

/// Binding executor error type
#[derive(Error, Debug, Diagnostic)]
pub enum ExecutorError {
    /// Node capacity changed under the decision; the workload is Pending again
    #[error("Bind conflict for workload '{workload_id}' on node '{node_id}': {message}")]
    #[diagnostic(
        code(stratus::executor::conflict),
        help("The workload was returned to Pending and will be rescored")
    )]
    Conflict {
        #[allow(unused)]
        workload_id: String,
        #[allow(unused)]
        node_id: String,
        #[allow(unused)]
        message: String,
    },

    /// Every attempt timed out; the workload is Failed
    #[error("Binding workload '{workload_id}' to node '{node_id}' timed out after {attempts} attempt(s)")]
    #[diagnostic(
        code(stratus::executor::timeout),
        help("Check that the orchestration API is reachable. Increase binder.request_timeout_secs or binder.max_attempts if it is just slow")
    )]
    Timeout {
        #[allow(unused)]
        workload_id: String,
        #[allow(unused)]
        node_id: String,
        #[allow(unused)]
        attempts: u32,
    },

    /// Orchestration API refused the request
    #[error("Orchestration API rejected workload '{workload_id}' on node '{node_id}': {message}")]
    #[diagnostic(
        code(stratus::executor::rejected),
        help("Check the orchestration API logs for the rejection reason")
    )]
    Rejected {
        #[allow(unused)]
        workload_id: String,
        #[allow(unused)]
        node_id: String,
        #[allow(unused)]
        message: String,
    },

    /// Operation not allowed in the workload's current state
    #[error("Cannot {operation} workload '{workload_id}' while it is {state}")]
    #[diagnostic(
        code(stratus::executor::invalid_state),
        help("Query the workload with GET /api/v1/workloads/{{id}} to see its current state")
    )]
    InvalidState {
        #[allow(unused)]
        workload_id: String,
        #[allow(unused)]
        state: String,
        #[allow(unused)]
        operation: String,
    },

    /// Core library error
    #[error(transparent)]
    #[diagnostic(transparent)]
    Core(#[from] stratus_core::StratusError),

    /// Audit persistence error
    #[error(transparent)]
    #[diagnostic(transparent)]
    Storage(#[from] stratus_storage::StorageError),
}

/// Result type for executor operations
pub type Result<T> = std::result::Result<T, ExecutorError>;

impl ExecutorError {
    pub fn invalid_state(
        workload_id: impl Into<String>,
        state: impl Into<String>,
        operation: impl Into<String>,
    ) -> Self {
        Self::InvalidState {
            workload_id: workload_id.into(),
            state: state.into(),
            operation: operation.into(),
        }
    }

    /// Lift an orchestration failure, recording how many attempts were made
    pub fn from_bind(err: BindError, attempts: u32) -> Self {
        match err {
            BindError::Conflict {
                workload_id,
                node_id,
                message,
            } => Self::Conflict {
                workload_id,
                node_id,
                message,
            },
            BindError::Timeout {
                workload_id,
                node_id,
            } => Self::Timeout {
                workload_id,
                node_id,
                attempts,
            },
            BindError::Rejected {
                workload_id,
                node_id,
                message,
            } => Self::Rejected {
                workload_id,
                node_id,
                message,
            },
        }
    }

    /// Whether the workload went back to Pending and should be rescored now
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}
