//! Partition planner (component C4): turns a [`PartitionTask`] into a
//! scored [`PartitionPlan`] using one of nine named strategies, with an
//! adaptive selector that learns per-(model, strategy) latency from
//! dispatch outcomes fed back by the scheduler.

pub mod config;
pub mod engine;
pub mod optimizer;
pub mod stats;
pub mod strategy;
pub mod types;

pub use config::PlannerConfig;
pub use engine::PartitionPlanner;
pub use stats::PlannerStats;
pub use strategy::{Strategy, StrategyRegistry};
pub use types::{
    ModelDescriptor, NodeCapability, Partition, PartitionPlan, PartitionTask, PartitionType,
    StrategyPerformanceRecord, StrategyStats,
};
