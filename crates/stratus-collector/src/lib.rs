//! Stratus Collector - Keeps every node's snapshot fresh
//!
//! Each tick the collector fetches the plain-text exposition of every known
//! node (bounded by `max_in_flight`), parses CPU, memory and per-device GPU
//! fields into a [`stratus_core::Snapshot`], and swaps it into the shared
//! [`stratus_core::SnapshotStore`]. Failures are counted per node and flip the
//! node to `degraded` after the configured number of consecutive misses.

pub mod collector;
pub mod error;
pub mod exposition;
pub mod source;

pub use collector::{CollectionSummary, MetricsCollector};
pub use error::{CollectError, Result};
pub use exposition::parse_snapshot;
pub use source::{HttpMetricsSource, MetricsSource, StaticMetricsSource};
