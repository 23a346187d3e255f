// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;

/// Failure reported by the orchestration layer for a single request
#[derive(Error, Debug, Diagnostic, Clone, PartialEq, Eq)]
pub enum BindError {
    /// Node capacity changed between scoring and binding
    #[error("Bind conflict for workload '{workload_id}' on node '{node_id}': {message}")]
    #[diagnostic(
        code(stratus::orchestrator::conflict),
        help("The node no longer has room for the workload. It is rescored against fresh data")
    )]
    Conflict {
        #[allow(unused)]
        workload_id: String,
        #[allow(unused)]
        node_id: String,
        #[allow(unused)]
        message: String,
    },

    /// No answer in time
    #[error("Orchestration request for workload '{workload_id}' on node '{node_id}' timed out")]
    #[diagnostic(
        code(stratus::orchestrator::timeout),
        help("The orchestration API is slow or unreachable. The request is retried with backoff")
    )]
    Timeout {
        #[allow(unused)]
        workload_id: String,
        #[allow(unused)]
        node_id: String,
    },

    /// Refused outright
    #[error("Orchestration API rejected workload '{workload_id}' on node '{node_id}': {message}")]
    #[diagnostic(
        code(stratus::orchestrator::rejected),
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
}

impl BindError {
    pub fn conflict(
        workload_id: impl Into<String>,
        node_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Conflict {
            workload_id: workload_id.into(),
            node_id: node_id.into(),
            message: message.into(),
        }
    }

    pub fn timeout(workload_id: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self::Timeout {
            workload_id: workload_id.into(),
            node_id: node_id.into(),
        }
    }

    pub fn rejected(
        workload_id: impl Into<String>,
        node_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Rejected {
            workload_id: workload_id.into(),
            node_id: node_id.into(),
            message: message.into(),
        }
    }

    /// Metric and audit label for this failure
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::Conflict { .. } => "conflict",
            Self::Timeout { .. } => "timeout",
            Self::Rejected { .. } => "rejected",
        }
    }
}

/// Binding capability of the orchestration layer
///
/// Implementations must be safe to call concurrently. The executor applies
/// its own timeout around every call and serializes binds per node.
#[async_trait]
pub trait OrchestrationApi: Send + Sync {
    /// Place a workload on a node
    async fn bind(&self, workload_id: &str, node_id: &str) -> Result<(), BindError>;

    /// Remove a workload from a node it is currently bound to
    async fn unbind(&self, workload_id: &str, node_id: &str) -> Result<(), BindError>;
}
