// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Core error type for Stratus operations
#[derive(Error, Debug, Diagnostic)]
pub enum StratusError {
    /// Configuration rejected at load time
    #[error("Invalid configuration: {message}")]
    #[diagnostic(
        code(stratus::invalid_config),
        help("{suggestion}")
    )]
    InvalidConfig {
        #[allow(unused)]
        message: String,
        #[allow(unused)]
        suggestion: String,
    },

    /// Workload state machine violation
    #[error("Invalid state transition for workload '{workload_id}': cannot transition from {from} to {to}")]
    #[diagnostic(
        code(stratus::invalid_transition),
        help("Workloads move Pending -> Binding -> Bound -> Running -> Completed/Failed/Evicted. A bind failure returns Binding -> Pending")
    )]
    InvalidTransition {
        #[allow(unused)]
        workload_id: String,
        #[allow(unused)]
        from: String,
        #[allow(unused)]
        to: String,
    },

    /// Workload not found
    #[error("Workload not found: {workload_id}")]
    #[diagnostic(
        code(stratus::workload_not_found),
        help("Verify the workload id. Completed and evicted workloads remain queryable until the process restarts")
    )]
    WorkloadNotFound {
        #[allow(unused)]
        workload_id: String,
    },

    /// Workload already submitted
    #[error("Workload already exists: {workload_id}")]
    #[diagnostic(
        code(stratus::workload_already_exists),
        help("Workload ids must be unique. Submit under a different id")
    )]
    WorkloadAlreadyExists {
        #[allow(unused)]
        workload_id: String,
    },

    /// Node not found
    #[error("Node not found: {node_id}")]
    #[diagnostic(
        code(stratus::node_not_found),
        help("Register the node first via the node inventory or POST /api/v1/nodes")
    )]
    NodeNotFound {
        #[allow(unused)]
        node_id: String,
    },

    /// Resource quantity could not be parsed
    #[error("Invalid quantity '{value}': {reason}")]
    #[diagnostic(
        code(stratus::invalid_quantity),
        help("CPU accepts cores (\"2\", \"0.5\") or millicores (\"500m\"). Memory accepts bytes or Ki/Mi/Gi/Ti suffixes")
    )]
    InvalidQuantity {
        #[allow(unused)]
        value: String,
        #[allow(unused)]
        reason: String,
    },

    /// Serialization error
    #[error("Serialization error: {message}")]
    #[diagnostic(
        code(stratus::serialization_error),
        help("Ensure the document is valid JSON or YAML")
    )]
    SerializationError {
        #[allow(unused)]
        message: String,
        #[source]
        #[allow(unused)]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Internal error
    #[error("Internal error: {message}")]
    #[diagnostic(
        code(stratus::internal_error),
        help("This is likely a bug. Please report it with the full error details")
    )]
    InternalError {
        #[allow(unused)]
        message: String,
    },
}

/// Result type alias for Stratus operations
pub type Result<T> = std::result::Result<T, StratusError>;

impl StratusError {
    /// Create an InvalidConfig error
    pub fn invalid_config(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create an InvalidTransition error
    pub fn invalid_transition(
        workload_id: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        Self::InvalidTransition {
            workload_id: workload_id.into(),
            from: from.into(),
            to: to.into(),
        }
    }

    /// Create a WorkloadNotFound error
    pub fn workload_not_found(workload_id: impl Into<String>) -> Self {
        Self::WorkloadNotFound {
            workload_id: workload_id.into(),
        }
    }

    /// Create a WorkloadAlreadyExists error
    pub fn workload_already_exists(workload_id: impl Into<String>) -> Self {
        Self::WorkloadAlreadyExists {
            workload_id: workload_id.into(),
        }
    }

    /// Create a NodeNotFound error
    pub fn node_not_found(node_id: impl Into<String>) -> Self {
        Self::NodeNotFound {
            node_id: node_id.into(),
        }
    }

    /// Create an InvalidQuantity error
    pub fn invalid_quantity(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidQuantity {
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Create a SerializationError
    pub fn serialization_error(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::SerializationError {
            message: message.into(),
            source,
        }
    }

    /// Create an InternalError
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = StratusError::workload_not_found("train-42");
        assert!(matches!(err, StratusError::WorkloadNotFound { .. }));
        assert_eq!(err.to_string(), "Workload not found: train-42");

        let err = StratusError::invalid_transition("train-42", "pending", "bound");
        assert!(err.to_string().contains("from pending to bound"));
    }
}
