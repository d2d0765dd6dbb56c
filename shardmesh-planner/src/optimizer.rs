//! Plan scoring and rewrite rules (§4.4.4), plus the EMA weight
//! reinforcement the adaptive strategy and [`crate::stats`] read from.

use std::collections::{HashMap, HashSet};

use crate::config::{OptimizationWeights, PlannerConfig};
use crate::strategy::{bandwidth_suitability, compute_suitability, memory_suitability, suitability};
use crate::types::{NodeCapability, PartitionPlan, PartitionTask, StrategyStats};

/// The four §4.4.4 metrics, each normalized to [0, 1] with higher-is-better
/// orientation.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanMetrics {
    pub latency: f64,
    pub throughput: f64,
    pub memory: f64,
    pub bandwidth: f64,
}

fn assigned_node<'a>(task: &'a PartitionTask, node_id: &str) -> Option<&'a NodeCapability> {
    task.candidate_nodes.iter().find(|n| n.node_id == node_id)
}

/// Derives the four plan-level metrics a rewrite pass or the final score
/// reads from. `latency` rewards a shorter critical path, `throughput`
/// rewards using more of the available fleet, `memory`/`bandwidth` average
/// the per-assigned-node sub-scores already used by §4.4.3's suitability
/// formula.
pub fn plan_metrics(plan: &PartitionPlan, task: &PartitionTask) -> PlanMetrics {
    let latency = 1.0 / (1.0 + plan.estimated_latency_ms / 1000.0);
    let throughput = (plan.partitions.len() as f64 / task.candidate_nodes.len().max(1) as f64).min(1.0);

    let assigned: Vec<&NodeCapability> = plan
        .partitions
        .iter()
        .filter_map(|p| assigned_node(task, &p.node_id))
        .collect();
    let (memory, bandwidth) = if assigned.is_empty() {
        (0.0, 0.0)
    } else {
        let mem_sum: f64 = assigned.iter().map(|n| memory_suitability(n)).sum();
        let bw_sum: f64 = assigned.iter().map(|n| bandwidth_suitability(n)).sum();
        (mem_sum / assigned.len() as f64, bw_sum / assigned.len() as f64)
    };

    PlanMetrics {
        latency,
        throughput,
        memory,
        bandwidth,
    }
}

/// `optimization_score = Σ wᵢ·metricᵢ` (§4.4.4).
pub fn optimization_score(metrics: &PlanMetrics, weights: &OptimizationWeights) -> f64 {
    weights.latency * metrics.latency
        + weights.throughput * metrics.throughput
        + weights.memory * metrics.memory
        + weights.bandwidth * metrics.bandwidth
}

/// Estimates latency as a function of partition count and per-hop
/// communication overhead: more partitions means more inter-node hops on
/// the critical path, each adding fixed latency.
pub fn estimate_latency_ms(plan: &PartitionPlan, per_hop_overhead_ms: f64) -> f64 {
    let critical_path_len = plan
        .partitions
        .iter()
        .map(|p| p.depends_on.len() + 1)
        .max()
        .unwrap_or(1) as f64;
    critical_path_len * per_hop_overhead_ms
}

/// Rewrite 1: if an unused candidate is meaningfully more suitable than the
/// node a partition currently sits on, move the partition there. Never
/// introduces a node beyond `task.candidate_nodes`, so I2 (plan membership)
/// still holds.
fn rewrite_placement_rebalance(plan: &mut PartitionPlan, task: &PartitionTask, config: &PlannerConfig) {
    let mut used: HashSet<String> = plan.partitions.iter().map(|p| p.node_id.clone()).collect();
    for partition in &mut plan.partitions {
        let current = match assigned_node(task, &partition.node_id) {
            Some(n) => n,
            None => continue,
        };
        let current_score = suitability(current);
        let best_unused = task
            .candidate_nodes
            .iter()
            .filter(|n| !used.contains(&n.node_id))
            .max_by(|a, b| suitability(a).partial_cmp(&suitability(b)).unwrap_or(std::cmp::Ordering::Equal));
        if let Some(candidate) = best_unused {
            if suitability(candidate) - current_score > config.placement_rebalance_margin {
                used.remove(&partition.node_id);
                used.insert(candidate.node_id.clone());
                partition.node_id = candidate.node_id.clone();
            }
        }
    }
}

/// Rewrite 2: among already-used nodes, pair the partitions spanning the
/// most layers with the highest compute-score nodes. A permutation of the
/// existing assignment, never adds a node.
fn rewrite_resource_balancing(plan: &mut PartitionPlan, task: &PartitionTask) {
    let mut indices: Vec<usize> = plan
        .partitions
        .iter()
        .enumerate()
        .filter(|(_, p)| p.layer_range.is_some())
        .map(|(i, _)| i)
        .collect();
    if indices.len() < 2 {
        return;
    }
    indices.sort_by_key(|&i| {
        let (start, end) = plan.partitions[i].layer_range.unwrap();
        std::cmp::Reverse(end - start)
    });

    let mut nodes: Vec<String> = indices.iter().map(|&i| plan.partitions[i].node_id.clone()).collect();
    nodes.sort_by(|a, b| {
        let score_a = assigned_node(task, a).map(compute_suitability).unwrap_or(0.0);
        let score_b = assigned_node(task, b).map(compute_suitability).unwrap_or(0.0);
        score_b.partial_cmp(&score_a).unwrap_or(std::cmp::Ordering::Equal)
    });

    for (&index, node_id) in indices.iter().zip(nodes) {
        plan.partitions[index].node_id = node_id;
    }
}

/// Rewrite 3: among already-used nodes, pair the partitions with the most
/// dependency edges (incoming + outgoing) with the highest-bandwidth nodes,
/// shortening the expected time spent shipping activations across the
/// slowest links.
fn rewrite_communication_minimization(plan: &mut PartitionPlan, task: &PartitionTask) {
    let mut degree = vec![0usize; plan.partitions.len()];
    for (i, partition) in plan.partitions.iter().enumerate() {
        degree[i] += partition.depends_on.len();
        for &dep in &partition.depends_on {
            if let Some(d) = degree.get_mut(dep) {
                *d += 1;
            }
        }
    }
    let mut indices: Vec<usize> = (0..plan.partitions.len()).collect();
    indices.sort_by_key(|&i| std::cmp::Reverse(degree[i]));

    let mut nodes: Vec<String> = indices.iter().map(|&i| plan.partitions[i].node_id.clone()).collect();
    nodes.sort_by(|a, b| {
        let score_a = assigned_node(task, a).map(bandwidth_suitability).unwrap_or(0.0);
        let score_b = assigned_node(task, b).map(bandwidth_suitability).unwrap_or(0.0);
        score_b.partial_cmp(&score_a).unwrap_or(std::cmp::Ordering::Equal)
    });

    for (&index, node_id) in indices.iter().zip(nodes) {
        plan.partitions[index].node_id = node_id;
    }
}

/// Runs the three §4.4.4 rewrites in order, then scores the result. Drops
/// plans whose partition count exceeds the configured ceiling rather than
/// silently truncating the node list — a truncated plan would
/// under-utilize the model's declared layer count.
pub fn rewrite_and_score(
    mut plan: PartitionPlan,
    task: &PartitionTask,
    config: &PlannerConfig,
) -> Option<PartitionPlan> {
    if plan.partitions.is_empty() {
        return None;
    }
    plan.estimated_latency_ms = estimate_latency_ms(&plan, 5.0);

    rewrite_placement_rebalance(&mut plan, task, config);
    rewrite_resource_balancing(&mut plan, task);
    rewrite_communication_minimization(&mut plan, task);
    plan.estimated_latency_ms = estimate_latency_ms(&plan, 5.0);

    let metrics = plan_metrics(&plan, task);
    let overshoot = plan.partitions.len().saturating_sub(config.max_partitions_per_plan) as f64;
    plan.score = optimization_score(&metrics, &config.optimization_weights) - overshoot * 0.1;
    Some(plan)
}

/// Updates the EMA latency and success rate for one strategy after a
/// dispatch outcome. `alpha` is the configured smoothing factor; a fresh
/// strategy with `sample_count == 0` takes the observation as-is rather
/// than blending against an arbitrary zero prior.
pub fn reinforce(stats: &mut StrategyStats, observed_latency_ms: f64, succeeded: bool, alpha: f64) {
    if stats.sample_count == 0 {
        stats.ema_latency_ms = observed_latency_ms;
        stats.success_rate = if succeeded { 1.0 } else { 0.0 };
    } else {
        stats.ema_latency_ms = alpha * observed_latency_ms + (1.0 - alpha) * stats.ema_latency_ms;
        let outcome = if succeeded { 1.0 } else { 0.0 };
        stats.success_rate = alpha * outcome + (1.0 - alpha) * stats.success_rate;
    }
    stats.sample_count += 1;
    stats.weight = stats.success_rate / stats.ema_latency_ms.max(1.0);
}

/// I4/§4.4.5: renormalizes a model's strategy weights back to summing to
/// 1.0 while respecting each weight's [0.01, 0.99] bound. Clamps every
/// weight's proportional share, then water-fills the residual across the
/// entries that weren't clamped, repeating until the remaining slack is
/// negligible or every entry is pinned to a bound.
pub fn renormalize_weights(per_model: &mut HashMap<String, StrategyStats>) {
    const MIN_WEIGHT: f64 = 0.01;
    const MAX_WEIGHT: f64 = 0.99;
    const EPSILON: f64 = 1e-9;

    if per_model.is_empty() {
        return;
    }

    let names: Vec<String> = per_model.keys().cloned().collect();
    let total: f64 = per_model.values().map(|s| s.weight.max(0.0)).sum();
    let mut shares: HashMap<String, f64> = if total > EPSILON {
        names
            .iter()
            .map(|n| (n.clone(), per_model[n].weight.max(0.0) / total))
            .collect()
    } else {
        let even = 1.0 / names.len() as f64;
        names.iter().map(|n| (n.clone(), even)).collect()
    };

    let mut fixed: HashSet<String> = HashSet::new();
    for _ in 0..names.len() + 1 {
        let free_count = names.len() - fixed.len();
        if free_count == 0 {
            break;
        }
        let fixed_sum: f64 = fixed.iter().map(|n| shares[n]).sum();
        let free_target = (1.0 - fixed_sum) / free_count as f64;

        let mut newly_fixed = Vec::new();
        for name in &names {
            if fixed.contains(name) {
                continue;
            }
            let clamped = free_target.clamp(MIN_WEIGHT, MAX_WEIGHT);
            if (clamped - free_target).abs() > EPSILON {
                shares.insert(name.clone(), clamped);
                newly_fixed.push(name.clone());
            } else {
                shares.insert(name.clone(), free_target);
            }
        }
        if newly_fixed.is_empty() {
            break;
        }
        fixed.extend(newly_fixed);
    }

    for name in &names {
        per_model.get_mut(name).unwrap().weight = shares[name];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_observation_sets_ema_directly() {
        let mut stats = StrategyStats::default();
        reinforce(&mut stats, 50.0, true, 0.2);
        assert_eq!(stats.ema_latency_ms, 50.0);
        assert_eq!(stats.sample_count, 1);
    }

    #[test]
    fn later_observations_blend_toward_new_value() {
        let mut stats = StrategyStats::default();
        reinforce(&mut stats, 50.0, true, 0.2);
        reinforce(&mut stats, 100.0, true, 0.2);
        assert!((stats.ema_latency_ms - 60.0).abs() < 1e-9);
    }

    #[test]
    fn failure_pulls_success_rate_down() {
        let mut stats = StrategyStats::default();
        reinforce(&mut stats, 50.0, true, 0.5);
        reinforce(&mut stats, 50.0, false, 0.5);
        assert!(stats.success_rate < 1.0);
    }
}
