//! Distributed scheduler (component C5): turns a partition plan into
//! dispatched work across the cluster, respecting the plan's dependency
//! DAG and a per-(node, model, layer-range) concurrency gate.

pub mod engine;
pub mod errors;
pub mod types;

pub use engine::DistributedScheduler;
pub use errors::SchedulerError;
pub use types::{DispatchOutcome, LocalRunner, SchedulerConfig};
