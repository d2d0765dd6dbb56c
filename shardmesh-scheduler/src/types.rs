use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

/// What the scheduler needs from the model-execution engine that actually
/// runs inference locally on a node. The scheduler never embeds that engine
/// directly (Design Notes §9: composition over a narrow interface) — it
/// only ever sees this capability.
#[async_trait]
pub trait LocalRunner: Send + Sync {
    /// Runs one partition's share of work locally. A single success-XOR-
    /// error message per call, matching the `GetRunner` entry contract.
    async fn run_partition(&self, node_id: &str, payload: Vec<u8>) -> anyhow::Result<Vec<u8>>;
    async fn shutdown(&self) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub per_key_queue_depth: usize,
    pub dispatch_timeout: Duration,
    pub max_retries: u32,
    /// Below this many estimated partitions, run locally instead of paying
    /// the distributed dispatch/aggregate overhead.
    pub distribute_above_partitions: usize,
    /// §4.5.3 step 5: on a partition's second failure, cancel the rest of
    /// the plan and fall back to the local runner instead of surfacing the
    /// failure to the caller.
    pub failback_to_local: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            per_key_queue_depth: 64,
            dispatch_timeout: Duration::from_secs(30),
            max_retries: 1,
            distribute_above_partitions: 1,
            failback_to_local: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchOutcome {
    pub partition_index: usize,
    pub node_id: String,
    pub latency_ms: f64,
    pub succeeded: bool,
}
