pub mod error;
pub mod filter;
pub mod rebalancer;
pub mod scheduler;
pub mod score;
pub mod scorer;
pub mod types;

#[cfg(test)]
mod test_util;

pub use error::{Result, SchedulerError};
pub use rebalancer::{NodeLoad, RebalanceReport, Rebalancer};
pub use scheduler::Scheduler;
pub use scorer::PlacementScorer;
pub use types::{FilterResult, NodeScore, SchedulingContext, ScoreResult};
