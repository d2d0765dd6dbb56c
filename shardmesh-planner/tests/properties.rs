//! §8 property tests P1-P4, run against the real strategy registry and
//! optimizer rather than hand-picked examples.

use std::collections::HashMap;

use proptest::prelude::*;

use shardmesh_planner::config::PlannerConfig;
use shardmesh_planner::optimizer::renormalize_weights;
use shardmesh_planner::strategy::StrategyRegistry;
use shardmesh_planner::types::{ModelDescriptor, NodeCapability, PartitionTask, StrategyStats};

fn node_capability(index: usize, free_memory_gb: f64, compute_score: f64, bandwidth_mbps: f64, latency_ms: f64) -> NodeCapability {
    NodeCapability {
        node_id: format!("node-{index}"),
        free_memory_gb,
        compute_score,
        bandwidth_mbps,
        latency_ms,
    }
}

prop_compose! {
    fn arb_task()(
        node_count in 1usize..8,
        layer_count in 1u32..64,
        parameter_count in 1_000_000_000u64..200_000_000_000,
        weights_size_bytes in 1_000_000_000u64..100_000_000_000,
        attention_heads in prop::sample::select(vec![8u32, 16, 32, 64]),
        hidden_size in 512u32..8192,
        supports_tensor_parallel in any::<bool>(),
        context_length in 1u32..8192,
        batch_size in 1u32..32,
        node_values in prop::collection::vec(
            (1.0f64..64.0, 1.0f64..500.0, 1.0f64..1000.0, 0.5f64..200.0),
            1..8,
        ),
    ) -> PartitionTask {
        let node_count = node_count.min(node_values.len());
        let candidate_nodes = node_values
            .into_iter()
            .take(node_count)
            .enumerate()
            .map(|(i, (mem, compute, bandwidth, latency))| node_capability(i, mem, compute, bandwidth, latency))
            .collect();
        PartitionTask {
            task_id: uuid::Uuid::nil(),
            model: ModelDescriptor {
                model_id: "prop-model".to_string(),
                parameter_count,
                layer_count,
                hidden_size,
                attention_heads,
                weights_size_bytes,
                supports_tensor_parallel,
            },
            candidate_nodes,
            requested_strategy: None,
            context_length,
            batch_size,
        }
    }
}

/// (node_id, layer_range, depends_on) tuples per partition, stable to
/// compare across two independent runs without relying on the random
/// `plan_id`/`task_id` the plan also carries.
fn plan_signature(plan: &shardmesh_planner::types::PartitionPlan) -> Vec<(String, Option<(u32, u32)>, Vec<usize>)> {
    plan.partitions
        .iter()
        .map(|p| (p.node_id.clone(), p.layer_range, p.depends_on.clone()))
        .collect()
}

proptest! {
    /// P1 (Plan integrity): every strategy that claims it can handle a task
    /// produces a plan whose dependency indices resolve within the same
    /// plan (I1) and whose nodes are all members of the task's candidate
    /// set (I2).
    #[test]
    fn p1_plan_integrity(task in arb_task()) {
        let registry = StrategyRegistry::with_defaults();
        let config = PlannerConfig::default();
        let known_ids: std::collections::HashSet<&str> =
            task.candidate_nodes.iter().map(|n| n.node_id.as_str()).collect();

        for strategy in registry.candidates_for(&task) {
            let plan = strategy.partition(&task, &config);
            for partition in &plan.partitions {
                // I2: node membership.
                prop_assert!(known_ids.contains(partition.node_id.as_str()));
                // I1: every dependency resolves to an earlier partition in
                // the same plan, which rules out both dangling references
                // and cycles.
                for &dep in &partition.depends_on {
                    prop_assert!(dep < partition.index);
                    prop_assert!(plan.partitions.iter().any(|p| p.index == dep));
                }
            }
        }
    }

    /// P2 (Layer coverage): layer-range and pipeline-parallel partition the
    /// model's layers into a gap-free, non-overlapping cover of [0, L).
    #[test]
    fn p2_layer_coverage(task in arb_task()) {
        let registry = StrategyRegistry::with_defaults();
        let config = PlannerConfig::default();
        let layer_count = task.model.layer_count;

        for name in ["layer-range", "pipeline-parallel"] {
            let strategy = registry.get(name).unwrap();
            if !strategy.can_handle(&task) {
                continue;
            }
            let plan = strategy.partition(&task, &config);
            let mut ranges: Vec<(u32, u32)> = plan
                .partitions
                .iter()
                .map(|p| p.layer_range.expect("layer-range partitions always carry a range"))
                .collect();
            ranges.sort_by_key(|&(start, _)| start);

            let mut cursor = 0u32;
            for (start, end) in &ranges {
                prop_assert_eq!(*start, cursor, "gap or overlap before layer {}", start);
                prop_assert!(end > start);
                cursor = *end;
            }
            prop_assert_eq!(cursor, layer_count, "layers not fully covered");
        }
    }

    /// P3 (Determinism): the same cluster snapshot and task produce the
    /// same plan (same node assignments, same ranges, same dependency
    /// structure) on every call.
    #[test]
    fn p3_determinism(task in arb_task()) {
        let registry = StrategyRegistry::with_defaults();
        let config = PlannerConfig::default();

        for strategy in registry.candidates_for(&task) {
            let first = plan_signature(&strategy.partition(&task, &config));
            let second = plan_signature(&strategy.partition(&task, &config));
            prop_assert_eq!(first, second);
        }
    }

    /// P4 (Round-trip idempotence of weights): after renormalizing, a
    /// model's strategy weights sum to 1 within 1e-9 and every entry sits
    /// in [0.01, 0.99].
    #[test]
    fn p4_weight_renormalization(
        raw_weights in prop::collection::vec(0.0f64..1000.0, 2..8),
    ) {
        let mut per_model: HashMap<String, StrategyStats> = raw_weights
            .into_iter()
            .enumerate()
            .map(|(i, weight)| {
                (
                    format!("strategy-{i}"),
                    StrategyStats {
                        weight,
                        ..StrategyStats::default()
                    },
                )
            })
            .collect();

        renormalize_weights(&mut per_model);

        let sum: f64 = per_model.values().map(|s| s.weight).sum();
        prop_assert!((sum - 1.0).abs() < 1e-6, "weights summed to {sum}, not 1.0");
        for stats in per_model.values() {
            prop_assert!(stats.weight >= 0.01 - 1e-9 && stats.weight <= 0.99 + 1e-9);
        }
    }
}
