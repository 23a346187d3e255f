//! Stratus Executor - Commits placement decisions and tracks workload state
//!
//! This crate provides:
//! - The `OrchestrationApi` seam with HTTP and in-memory implementations
//! - The workload registry and its state machine
//! - The append-only audit log of every bind and unbind attempt
//! - `BindingExecutor`, which serializes binds per node and applies the
//!   conflict, timeout and rejection policies

pub mod api;
pub mod api_client;
pub mod audit;
pub mod error;
pub mod executor;
pub mod mock;
pub mod registry;

pub use api::{BindError, OrchestrationApi};
pub use api_client::HttpOrchestrationApi;
pub use audit::{AuditAction, AuditCause, AuditEntry, AuditLog, AuditOutcome, NewAuditEntry};
pub use error::{ExecutorError, Result};
pub use executor::{BindingExecutor, MoveOutcome};
pub use mock::{MockCall, MockOrchestrationApi, MockOutcome};
pub use registry::{WorkloadRecord, WorkloadRegistry};
