//! Stratus Storage - Durable record storage for the engine
//!
//! The audit log is the only persistent state. This crate provides:
//! - KVStore, an ordered append-only record store
//! - a redb-backed implementation
//! - key encoding for audit records

pub mod encoding;
pub mod error;
pub mod kv;
pub mod redb_backend;

pub use encoding::KeyEncoder;
pub use error::{Result, StorageError};
pub use kv::KVStore;
pub use redb_backend::RedbBackend;
