pub mod audit;
pub mod metrics;
pub mod nodes;
pub mod workloads;

// Re-export handler functions
pub use audit::*;
pub use metrics::*;
pub use nodes::*;
pub use workloads::*;
