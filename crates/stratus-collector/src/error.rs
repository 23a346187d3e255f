// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use stratus_core::FailureKind;
use thiserror::Error;

/// Collection error type
#[derive(Error, Debug, Diagnostic)]
pub enum CollectError {
    /// Metrics endpoint could not be reached in time
    #[error("Node '{node_id}' unreachable: {message}")]
    #[diagnostic(
        code(stratus::collector::unreachable),
        help("Check that the node exporter is running and reachable from the engine. The node's snapshot is invalidated until a collection succeeds")
    )]
    Unreachable {
        #[allow(unused)]
        node_id: String,
        #[allow(unused)]
        message: String,
    },

    /// Endpoint answered with an unusable body
    #[error("Failed to parse metrics from node '{node_id}': {message}")]
    #[diagnostic(
        code(stratus::collector::parse_failure),
        help("The exporter must publish node_cpu_used_millicores and node_memory_used_bytes, and label every GPU sample with gpu=\"<index>\"")
    )]
    ParseFailure {
        #[allow(unused)]
        node_id: String,
        #[allow(unused)]
        message: String,
    },

    /// Node is not part of the inventory
    #[error("Node not found: {node_id}")]
    #[diagnostic(
        code(stratus::collector::node_not_found),
        help("Register the node first with POST /api/v1/nodes or list it in the config file")
    )]
    NodeNotFound {
        #[allow(unused)]
        node_id: String,
    },
}

/// Result type for collection operations
pub type Result<T> = std::result::Result<T, CollectError>;

impl CollectError {
    pub fn unreachable(node_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unreachable {
            node_id: node_id.into(),
            message: message.into(),
        }
    }

    pub fn parse_failure(node_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ParseFailure {
            node_id: node_id.into(),
            message: message.into(),
        }
    }

    pub fn node_not_found(node_id: impl Into<String>) -> Self {
        Self::NodeNotFound {
            node_id: node_id.into(),
        }
    }

    /// How the failure counts against the node's health, if at all
    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            Self::Unreachable { .. } => Some(FailureKind::Unreachable),
            Self::ParseFailure { .. } => Some(FailureKind::ParseFailure),
            Self::NodeNotFound { .. } => None,
        }
    }
}
