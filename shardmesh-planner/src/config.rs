//! Planner configuration and the thresholds the strategy-selection table
//! (suitability formula in §4.4.3) and decision tree (§4.4.2) are built
//! from.

use serde::{Deserialize, Serialize};

/// §4.4.4 `optimization_score = Σwᵢ·metricᵢ` weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationWeights {
    pub latency: f64,
    pub throughput: f64,
    pub memory: f64,
    pub bandwidth: f64,
}

impl Default for OptimizationWeights {
    fn default() -> Self {
        Self {
            latency: 0.4,
            throughput: 0.3,
            memory: 0.2,
            bandwidth: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Below this parameter count, single-node execution is always
    /// preferred over any partitioning strategy.
    pub min_parameters_to_partition: u64,
    /// Layer count bucket boundaries used to estimate a model's layer
    /// count when it is not reported directly (Open Question resolution:
    /// fall back to the largest bucket whose lower bound the parameter
    /// count clears).
    pub layer_count_buckets: Vec<(u64, u32)>,
    pub max_partitions_per_plan: usize,
    pub ema_smoothing_factor: f64,
    pub performance_history_capacity: usize,
    /// §4.4.3 layer-range assignment clamp bounds.
    pub min_layers_per_node: u32,
    pub max_layers_per_node: u32,
    /// §4.4.2 decision tree thresholds.
    pub large_model_gib: f64,
    pub many_layers: u32,
    pub large_context: u32,
    pub high_parallelism: f64,
    pub optimization_weights: OptimizationWeights,
    /// §4.4.4 placement-rebalance rewrite: minimum suitability margin an
    /// unused candidate must clear over the currently assigned node before
    /// a partition is moved to it.
    pub placement_rebalance_margin: f64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            min_parameters_to_partition: 1_000_000_000,
            layer_count_buckets: vec![
                (1_000_000_000, 24),
                (7_000_000_000, 32),
                (13_000_000_000, 40),
                (70_000_000_000, 80),
                (175_000_000_000, 96),
            ],
            max_partitions_per_plan: 64,
            ema_smoothing_factor: 0.2,
            performance_history_capacity: 1000,
            min_layers_per_node: 2,
            max_layers_per_node: 20,
            large_model_gib: 5.0,
            many_layers: 20,
            large_context: 2048,
            high_parallelism: 0.8,
            optimization_weights: OptimizationWeights::default(),
            placement_rebalance_margin: 0.1,
        }
    }
}

impl PlannerConfig {
    pub fn estimate_layer_count(&self, parameter_count: u64) -> u32 {
        self.layer_count_buckets
            .iter()
            .rev()
            .find(|(threshold, _)| parameter_count >= *threshold)
            .map(|(_, layers)| *layers)
            .unwrap_or_else(|| self.layer_count_buckets.first().map(|(_, l)| *l).unwrap_or(24))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_picks_largest_matching_bucket() {
        let config = PlannerConfig::default();
        assert_eq!(config.estimate_layer_count(500_000_000), 24);
        assert_eq!(config.estimate_layer_count(8_000_000_000), 32);
        assert_eq!(config.estimate_layer_count(200_000_000_000), 96);
    }
}
