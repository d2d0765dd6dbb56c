//! Strategy polymorphism (Design Notes §9): every partitioning scheme,
//! including the adaptive one, is just another entry in a name-keyed
//! registry — nothing about `AdaptiveStrategy` is special-cased by the
//! planner engine.

use std::collections::HashMap;

use uuid::Uuid;

use crate::config::PlannerConfig;
use crate::types::{
    NodeCapability, Partition, PartitionPlan, PartitionTask, PartitionType, StrategyStatsByModel,
};

const MEMORY_THRESHOLD_GIB: f64 = 2.0;
const COMPUTE_THRESHOLD: f64 = 100.0;
const BANDWIDTH_THRESHOLD_MBPS: f64 = 100.0;
const LATENCY_THRESHOLD_MS: f64 = 10.0;

pub(crate) fn memory_suitability(node: &NodeCapability) -> f64 {
    (node.free_memory_gb / MEMORY_THRESHOLD_GIB).clamp(0.0, 1.0)
}

pub(crate) fn compute_suitability(node: &NodeCapability) -> f64 {
    (node.compute_score / COMPUTE_THRESHOLD).clamp(0.0, 1.0)
}

pub(crate) fn bandwidth_suitability(node: &NodeCapability) -> f64 {
    (node.bandwidth_mbps / BANDWIDTH_THRESHOLD_MBPS).clamp(0.0, 1.0)
}

pub(crate) fn latency_suitability(node: &NodeCapability) -> f64 {
    (LATENCY_THRESHOLD_MS / node.latency_ms.max(0.001)).clamp(0.0, 1.0)
}

/// §4.4.3 step 1: weighted sum of the four sub-scores, each already clamped
/// to [0, 1] against its fixed threshold.
pub(crate) fn suitability(node: &NodeCapability) -> f64 {
    0.4 * memory_suitability(node)
        + 0.3 * compute_suitability(node)
        + 0.2 * bandwidth_suitability(node)
        + 0.1 * latency_suitability(node)
}

/// §4.4.3 step 2: suitability descending, ascending NodeID tie-break.
fn sorted_by_suitability(nodes: &[NodeCapability]) -> Vec<&NodeCapability> {
    let mut sorted: Vec<&NodeCapability> = nodes.iter().collect();
    sorted.sort_by(|a, b| {
        suitability(b)
            .partial_cmp(&suitability(a))
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.node_id.cmp(&b.node_id))
    });
    sorted
}

pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this strategy can produce a plan at all for this task (e.g.
    /// tensor-parallel requires `supports_tensor_parallel` and at least two
    /// candidate nodes).
    fn can_handle(&self, task: &PartitionTask) -> bool;

    fn partition(&self, task: &PartitionTask, config: &PlannerConfig) -> PartitionPlan;
}

pub struct StrategyRegistry {
    strategies: HashMap<&'static str, Box<dyn Strategy>>,
}

impl StrategyRegistry {
    pub fn with_defaults() -> Self {
        let mut registry = Self {
            strategies: HashMap::new(),
        };
        registry.register(Box::new(LayerRangeStrategy));
        registry.register(Box::new(DataShardStrategy));
        registry.register(Box::new(TaskParallelStrategy));
        registry.register(Box::new(SequenceRangeStrategy));
        registry.register(Box::new(AttentionHeadsStrategy));
        registry.register(Box::new(PipelineParallelStrategy));
        registry.register(Box::new(TensorParallelStrategy));
        registry.register(Box::new(HybridStrategy));
        registry.register(Box::new(AdaptiveStrategy));
        registry
    }

    pub fn register(&mut self, strategy: Box<dyn Strategy>) {
        self.strategies.insert(strategy.name(), strategy);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Strategy> {
        self.strategies.get(name).map(|s| s.as_ref())
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.strategies.keys().copied().collect()
    }

    pub fn candidates_for(&self, task: &PartitionTask) -> Vec<&dyn Strategy> {
        self.strategies
            .values()
            .filter(|s| s.name() != "adaptive" && s.can_handle(task))
            .map(|s| s.as_ref())
            .collect()
    }
}

fn base_plan(task: &PartitionTask, strategy_name: &str, partitions: Vec<Partition>) -> PartitionPlan {
    PartitionPlan {
        plan_id: Uuid::new_v4(),
        task_id: task.task_id,
        strategy_name: strategy_name.to_string(),
        partitions,
        estimated_latency_ms: 0.0,
        score: 0.0,
    }
}

/// Splits the model's layers evenly across candidate nodes, in a linear
/// dependency chain (each partition depends on the previous one, since
/// activations flow layer-by-layer).
pub struct LayerRangeStrategy;

impl Strategy for LayerRangeStrategy {
    fn name(&self) -> &'static str {
        "layer-range"
    }

    fn can_handle(&self, task: &PartitionTask) -> bool {
        !task.candidate_nodes.is_empty()
    }

    fn partition(&self, task: &PartitionTask, config: &PlannerConfig) -> PartitionPlan {
        let layer_count = if task.model.layer_count > 0 {
            task.model.layer_count
        } else {
            config.estimate_layer_count(task.model.parameter_count)
        };
        let sorted = sorted_by_suitability(&task.candidate_nodes);
        let node_count = sorted.len();

        let mut partitions = Vec::new();
        let mut remaining_layers = layer_count;
        let mut index = 0usize;
        for (i, node) in sorted.iter().enumerate() {
            if remaining_layers == 0 {
                break;
            }
            let remaining_nodes = node_count - i;
            let assign = if remaining_nodes <= 1 {
                // §4.4.3 step 3: overflow is absorbed by the last group.
                remaining_layers
            } else {
                let share = (remaining_layers as f64 / remaining_nodes as f64).ceil();
                let scaled = (share * (0.5 + 0.5 * suitability(node))).round() as u32;
                scaled
                    .clamp(config.min_layers_per_node, config.max_layers_per_node)
                    .min(remaining_layers)
            };
            if assign == 0 {
                continue;
            }
            let start = layer_count - remaining_layers;
            let end = start + assign;
            partitions.push(Partition {
                index,
                partition_type: PartitionType::LayerRange,
                node_id: node.node_id.clone(),
                layer_range: Some((start, end)),
                depends_on: if index == 0 { vec![] } else { vec![index - 1] },
            });
            remaining_layers -= assign;
            index += 1;
        }
        base_plan(task, self.name(), partitions)
    }
}

/// Replicates the full model on every candidate node and assigns each an
/// independent data shard; no inter-partition dependency.
pub struct DataShardStrategy;

impl Strategy for DataShardStrategy {
    fn name(&self) -> &'static str {
        "data-shard"
    }

    fn can_handle(&self, task: &PartitionTask) -> bool {
        !task.candidate_nodes.is_empty()
    }

    fn partition(&self, task: &PartitionTask, _config: &PlannerConfig) -> PartitionPlan {
        let partitions = task
            .candidate_nodes
            .iter()
            .enumerate()
            .map(|(index, node_id)| Partition {
                index,
                partition_type: PartitionType::DataShard,
                node_id: node_id.node_id.clone(),
                layer_range: None,
                depends_on: vec![],
            })
            .collect();
        base_plan(task, self.name(), partitions)
    }
}

/// One independent task-parallel partition per candidate node; used for
/// embarrassingly-parallel batched inference requests.
pub struct TaskParallelStrategy;

impl Strategy for TaskParallelStrategy {
    fn name(&self) -> &'static str {
        "task-parallel"
    }

    fn can_handle(&self, task: &PartitionTask) -> bool {
        task.candidate_nodes.len() >= 2
    }

    fn partition(&self, task: &PartitionTask, _config: &PlannerConfig) -> PartitionPlan {
        let partitions = task
            .candidate_nodes
            .iter()
            .enumerate()
            .map(|(index, node_id)| Partition {
                index,
                partition_type: PartitionType::TaskParallel,
                node_id: node_id.node_id.clone(),
                layer_range: None,
                depends_on: vec![],
            })
            .collect();
        base_plan(task, self.name(), partitions)
    }
}

/// Splits the input sequence into contiguous ranges processed independently
/// (e.g. long-context prefill chunking).
pub struct SequenceRangeStrategy;

impl Strategy for SequenceRangeStrategy {
    fn name(&self) -> &'static str {
        "sequence-range"
    }

    fn can_handle(&self, task: &PartitionTask) -> bool {
        !task.candidate_nodes.is_empty()
    }

    fn partition(&self, task: &PartitionTask, _config: &PlannerConfig) -> PartitionPlan {
        // Each range depends on the previous for its incoming hidden state
        // (§4.4.1): a contiguous-range chunking is inherently sequential,
        // unlike data-shard/task-parallel's independent partitions.
        let partitions = task
            .candidate_nodes
            .iter()
            .enumerate()
            .map(|(index, node_id)| Partition {
                index,
                partition_type: PartitionType::SequenceRange,
                node_id: node_id.node_id.clone(),
                layer_range: None,
                depends_on: if index == 0 { vec![] } else { vec![index - 1] },
            })
            .collect();
        base_plan(task, self.name(), partitions)
    }
}

/// Splits attention heads across nodes within the same layer stack; only
/// viable when the head count divides evenly across candidates.
pub struct AttentionHeadsStrategy;

impl Strategy for AttentionHeadsStrategy {
    fn name(&self) -> &'static str {
        "attention-heads"
    }

    fn can_handle(&self, task: &PartitionTask) -> bool {
        let n = task.candidate_nodes.len() as u32;
        n >= 2 && task.model.attention_heads % n == 0
    }

    fn partition(&self, task: &PartitionTask, _config: &PlannerConfig) -> PartitionPlan {
        let partitions = task
            .candidate_nodes
            .iter()
            .enumerate()
            .map(|(index, node_id)| Partition {
                index,
                partition_type: PartitionType::AttentionHeads,
                node_id: node_id.node_id.clone(),
                layer_range: None,
                depends_on: vec![],
            })
            .collect();
        base_plan(task, self.name(), partitions)
    }
}

/// Chains layer ranges with an explicit pipeline stage ordering, same shape
/// as layer-range but named separately because its scheduling semantics
/// (micro-batched pipeline fill) differ downstream in the scheduler.
pub struct PipelineParallelStrategy;

impl Strategy for PipelineParallelStrategy {
    fn name(&self) -> &'static str {
        "pipeline-parallel"
    }

    fn can_handle(&self, task: &PartitionTask) -> bool {
        task.candidate_nodes.len() >= 2
    }

    fn partition(&self, task: &PartitionTask, config: &PlannerConfig) -> PartitionPlan {
        LayerRangeStrategy.partition(task, config)
    }
}

/// Splits each layer's weight matrices column-wise across nodes; requires
/// explicit model support since it changes the numerical reduction needed
/// after every layer.
pub struct TensorParallelStrategy;

impl Strategy for TensorParallelStrategy {
    fn name(&self) -> &'static str {
        "tensor-parallel"
    }

    fn can_handle(&self, task: &PartitionTask) -> bool {
        task.model.supports_tensor_parallel && task.candidate_nodes.len() >= 2
    }

    fn partition(&self, task: &PartitionTask, _config: &PlannerConfig) -> PartitionPlan {
        let partitions = task
            .candidate_nodes
            .iter()
            .enumerate()
            .map(|(index, node_id)| Partition {
                index,
                partition_type: PartitionType::TensorParallel,
                node_id: node_id.node_id.clone(),
                layer_range: None,
                depends_on: vec![],
            })
            .collect();
        base_plan(task, self.name(), partitions)
    }
}

/// Combines layer-range partitioning across node groups with tensor
/// parallelism inside each group; viable only for large models with enough
/// nodes to form at least two groups.
pub struct HybridStrategy;

impl Strategy for HybridStrategy {
    fn name(&self) -> &'static str {
        "hybrid"
    }

    fn can_handle(&self, task: &PartitionTask) -> bool {
        task.model.supports_tensor_parallel && task.candidate_nodes.len() >= 4
    }

    fn partition(&self, task: &PartitionTask, config: &PlannerConfig) -> PartitionPlan {
        let layer_count = if task.model.layer_count > 0 {
            task.model.layer_count
        } else {
            config.estimate_layer_count(task.model.parameter_count)
        };
        let sorted = sorted_by_suitability(&task.candidate_nodes);
        let node_count = sorted.len();
        // stages = ⌈√N⌉, nodes/stage = N/stages: pipeline across stages,
        // tensor-parallel within each stage (every node in a stage shares
        // the stage's layer range and depends on the whole previous stage).
        let stages = (node_count as f64).sqrt().ceil().max(1.0) as usize;
        let nodes_per_stage = (node_count / stages).max(1);

        let mut partitions = Vec::new();
        let mut remaining_layers = layer_count;
        let mut cursor = 0usize;
        let mut prev_stage_indices: Vec<usize> = Vec::new();
        let mut index = 0usize;
        while cursor < node_count {
            let group_size = nodes_per_stage.min(node_count - cursor);
            let stages_left = (node_count - cursor).div_ceil(nodes_per_stage).max(1);
            let layer_share = if remaining_layers == 0 {
                0
            } else {
                (remaining_layers / stages_left as u32).max(1).min(remaining_layers)
            };
            let start = layer_count - remaining_layers;
            let end = start + layer_share;

            let mut this_stage_indices = Vec::new();
            for node in &sorted[cursor..cursor + group_size] {
                partitions.push(Partition {
                    index,
                    partition_type: PartitionType::Hybrid,
                    node_id: node.node_id.clone(),
                    layer_range: Some((start, end)),
                    depends_on: prev_stage_indices.clone(),
                });
                this_stage_indices.push(index);
                index += 1;
            }
            prev_stage_indices = this_stage_indices;
            remaining_layers -= layer_share;
            cursor += group_size;
        }
        base_plan(task, self.name(), partitions)
    }
}

/// Delegates to whichever non-adaptive strategy the [`crate::engine`]'s
/// weighted EMA selection picked; it never produces a plan on its own, so
/// `can_handle` always returns false and it is excluded from
/// [`StrategyRegistry::candidates_for`].
pub struct AdaptiveStrategy;

impl Strategy for AdaptiveStrategy {
    fn name(&self) -> &'static str {
        "adaptive"
    }

    fn can_handle(&self, _task: &PartitionTask) -> bool {
        false
    }

    fn partition(&self, task: &PartitionTask, config: &PlannerConfig) -> PartitionPlan {
        LayerRangeStrategy.partition(task, config)
    }
}

const KNOWN_TRANSFORMER_FAMILIES: &[&str] = &[
    "llama", "gpt", "mistral", "falcon", "qwen", "mixtral", "gemma", "phi",
];

fn is_known_transformer_family(model_id: &str) -> bool {
    let lower = model_id.to_lowercase();
    KNOWN_TRANSFORMER_FAMILIES.iter().any(|f| lower.contains(f))
}

/// `clamp((context/2048)·(batch/4), 0, 1)`, boosted 1.2x for recognized
/// transformer families (§4.4.2).
fn estimated_parallelizability(task: &PartitionTask) -> f64 {
    let base = ((task.context_length as f64 / 2048.0) * (task.batch_size as f64 / 4.0)).clamp(0.0, 1.0);
    let boosted = if is_known_transformer_family(&task.model.model_id) {
        base * 1.2
    } else {
        base
    };
    boosted.clamp(0.0, 1.0)
}

/// §4.4.2's decision tree, evaluated against model size in GiB and layer
/// count. Returns the strategy name the tree would pick; the caller still
/// has to confirm that strategy is actually among the candidates.
fn decide_strategy_name(task: &PartitionTask, config: &PlannerConfig) -> &'static str {
    let size_gib = task.model.weights_size_bytes as f64 / 1_073_741_824.0;
    let layers = task.model.layer_count;
    let large_model = size_gib > config.large_model_gib;
    let many_layers = layers > config.many_layers;
    let large_context = task.context_length > config.large_context;
    let high_parallelism = estimated_parallelizability(task) > config.high_parallelism;
    let multi_node = task.candidate_nodes.len() > 1;

    if large_model && many_layers {
        "pipeline-parallel"
    } else if large_context && high_parallelism {
        "tensor-parallel"
    } else if large_model && large_context {
        "hybrid"
    } else if multi_node && many_layers {
        "pipeline-parallel"
    } else {
        "layer-range"
    }
}

/// Runs the §4.4.2 decision tree first; if the tree's pick isn't among the
/// candidates that can actually handle this task, falls back to the lowest
/// EMA latency, tie-broken by strategy name so the choice stays
/// deterministic regardless of the registry's `HashMap` iteration order
/// (P3) rather than depending on cold-stats insertion order.
pub fn select_adaptive<'a>(
    candidates: &[&'a dyn Strategy],
    task: &PartitionTask,
    stats: &StrategyStatsByModel,
    config: &PlannerConfig,
) -> Option<&'a dyn Strategy> {
    let decided = decide_strategy_name(task, config);
    if let Some(strategy) = candidates.iter().copied().find(|s| s.name() == decided) {
        return Some(strategy);
    }

    let model_id = &task.model.model_id;
    candidates.iter().copied().min_by(|a, b| {
        let score_a = stats
            .get(model_id)
            .and_then(|m| m.get(a.name()))
            .map(|s| s.ema_latency_ms)
            .unwrap_or(f64::MAX / 2.0);
        let score_b = stats
            .get(model_id)
            .and_then(|m| m.get(b.name()))
            .map(|s| s.ema_latency_ms)
            .unwrap_or(f64::MAX / 2.0);
        score_a
            .partial_cmp(&score_b)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.name().cmp(b.name()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(nodes: usize) -> PartitionTask {
        PartitionTask {
            task_id: Uuid::new_v4(),
            model: crate::types::ModelDescriptor {
                model_id: "m1".into(),
                parameter_count: 7_000_000_000,
                layer_count: 12,
                hidden_size: 4096,
                attention_heads: 32,
                weights_size_bytes: 2_000_000_000,
                supports_tensor_parallel: true,
            },
            candidate_nodes: (0..nodes).map(|i| NodeCapability::uniform(format!("node-{i}"))).collect(),
            requested_strategy: None,
            context_length: 512,
            batch_size: 1,
        }
    }

    #[test]
    fn layer_range_chains_dependencies() {
        let plan = LayerRangeStrategy.partition(&task(4), &PlannerConfig::default());
        assert_eq!(plan.partitions.len(), 4);
        assert!(plan.partitions[0].depends_on.is_empty());
        assert_eq!(plan.partitions[1].depends_on, vec![0]);
    }

    #[test]
    fn attention_heads_requires_even_division() {
        let t = task(5); // 32 heads / 5 nodes doesn't divide evenly
        assert!(!AttentionHeadsStrategy.can_handle(&t));
        let t2 = task(4); // divides evenly
        assert!(AttentionHeadsStrategy.can_handle(&t2));
    }

    #[test]
    fn adaptive_never_self_selects_as_a_candidate() {
        let registry = StrategyRegistry::with_defaults();
        let candidates = registry.candidates_for(&task(4));
        assert!(!candidates.iter().any(|s| s.name() == "adaptive"));
    }

    #[test]
    fn select_adaptive_follows_decision_tree_for_large_many_layer_model() {
        let registry = StrategyRegistry::with_defaults();
        let mut t = task(4);
        t.model.weights_size_bytes = 6 * 1_073_741_824; // > 5 GiB
        t.model.layer_count = 40; // > 20
        let candidates = registry.candidates_for(&t);
        let picked = select_adaptive(&candidates, &t, &StrategyStatsByModel::new(), &PlannerConfig::default())
            .unwrap();
        assert_eq!(picked.name(), "pipeline-parallel");
    }

    #[test]
    fn select_adaptive_falls_back_to_lowest_ema_latency_when_tree_pick_unavailable() {
        let registry = StrategyRegistry::with_defaults();
        let mut t = task(4);
        t.context_length = 4096;
        t.batch_size = 8; // decision tree wants tensor-parallel here
        t.model.supports_tensor_parallel = false; // but it can't handle the task
        let candidates = registry.candidates_for(&t);
        assert!(!candidates.iter().any(|s| s.name() == "tensor-parallel"));

        let mut stats: StrategyStatsByModel = HashMap::new();
        let mut per_model = HashMap::new();
        per_model.insert(
            "layer-range".to_string(),
            crate::types::StrategyStats {
                ema_latency_ms: 10.0,
                success_rate: 1.0,
                sample_count: 5,
                weight: 1.0,
            },
        );
        per_model.insert(
            "data-shard".to_string(),
            crate::types::StrategyStats {
                ema_latency_ms: 100.0,
                success_rate: 1.0,
                sample_count: 5,
                weight: 1.0,
            },
        );
        stats.insert("m1".to_string(), per_model);
        let picked = select_adaptive(&candidates, &t, &stats, &PlannerConfig::default()).unwrap();
        assert_eq!(picked.name(), "layer-range");
    }
}
