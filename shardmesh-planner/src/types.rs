use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub model_id: String,
    pub parameter_count: u64,
    pub layer_count: u32,
    pub hidden_size: u32,
    pub attention_heads: u32,
    pub weights_size_bytes: u64,
    pub supports_tensor_parallel: bool,
}

/// Snapshot of a candidate node's capacity, carried in the task rather than
/// looked up mid-planning so that suitability scoring (§4.4.3) and the
/// deterministic NodeID tie-break are pure functions of the task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeCapability {
    pub node_id: String,
    pub free_memory_gb: f64,
    pub compute_score: f64,
    pub bandwidth_mbps: f64,
    pub latency_ms: f64,
}

impl NodeCapability {
    /// A node with exactly the suitability thresholds' reference capacity,
    /// so a fleet built from this constructor scores as uniformly suitable
    /// and falls back entirely to the NodeID tie-break — useful for tests
    /// and benchmarks that care about assignment shape, not placement.
    pub fn uniform(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            free_memory_gb: 16.0,
            compute_score: 100.0,
            bandwidth_mbps: 100.0,
            latency_ms: 10.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartitionType {
    LayerRange,
    DataShard,
    TaskParallel,
    SequenceRange,
    AttentionHeads,
    PipelineParallel,
    TensorParallel,
    Hybrid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Partition {
    pub index: usize,
    pub partition_type: PartitionType,
    pub node_id: String,
    pub layer_range: Option<(u32, u32)>,
    pub depends_on: Vec<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionTask {
    pub task_id: Uuid,
    pub model: ModelDescriptor,
    pub candidate_nodes: Vec<NodeCapability>,
    pub requested_strategy: Option<String>,
    /// Requested context window, used by the adaptive strategy's
    /// parallelizability estimate (§4.4.2).
    pub context_length: u32,
    /// Requested batch size, same use as `context_length`.
    pub batch_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionPlan {
    pub plan_id: Uuid,
    pub task_id: Uuid,
    pub strategy_name: String,
    pub partitions: Vec<Partition>,
    pub estimated_latency_ms: f64,
    pub score: f64,
}

impl PartitionPlan {
    pub fn partitions_without_dependencies(&self) -> Vec<&Partition> {
        self.partitions
            .iter()
            .filter(|p| p.depends_on.is_empty())
            .collect()
    }

    /// Partitions whose full dependency set is contained in `completed`.
    pub fn ready_after(&self, completed: &[usize]) -> Vec<&Partition> {
        self.partitions
            .iter()
            .filter(|p| !completed.contains(&p.index))
            .filter(|p| p.depends_on.iter().all(|d| completed.contains(d)))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyPerformanceRecord {
    pub strategy_name: String,
    pub model_id: String,
    pub observed_latency_ms: f64,
    pub succeeded: bool,
}

/// Exponential-moving-average summary the adaptive strategy and the
/// optimizer's weight reinforcement both read from.
#[derive(Debug, Clone, Default)]
pub struct StrategyStats {
    pub ema_latency_ms: f64,
    pub success_rate: f64,
    pub sample_count: u64,
    pub weight: f64,
}

pub type StrategyStatsByModel = HashMap<String, HashMap<String, StrategyStats>>;
