//! Stratus API Server - HTTP surface of the scheduling engine
//!
//! This crate provides:
//! - Axum-based HTTP server
//! - Workload submission, queries, lifecycle reports and eviction
//! - Node membership (register, replace, remove) with collection health
//! - Audit log queries
//! - Prometheus `/metrics` export and health probes

pub mod error;
pub mod handlers;
pub mod response;
pub mod server;
pub mod state;

// Re-export commonly used types
pub use error::{ApiError, Result};
pub use server::{ApiServer, Config};
pub use state::AppState;
