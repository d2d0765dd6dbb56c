//! Strategy performance aggregation. Collects
//! [`StrategyPerformanceRecord`]s into the per-(model, strategy) EMA table
//! the adaptive strategy selects from.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::config::PlannerConfig;
use crate::optimizer::{reinforce, renormalize_weights};
use crate::types::{StrategyPerformanceRecord, StrategyStats, StrategyStatsByModel};

pub struct PlannerStats {
    by_model: RwLock<StrategyStatsByModel>,
    history: RwLock<Vec<StrategyPerformanceRecord>>,
    history_capacity: usize,
    alpha: f64,
}

impl PlannerStats {
    pub fn new(config: &PlannerConfig) -> Self {
        Self {
            by_model: RwLock::new(HashMap::new()),
            history: RwLock::new(Vec::new()),
            history_capacity: config.performance_history_capacity,
            alpha: config.ema_smoothing_factor,
        }
    }

    pub fn record(&self, record: StrategyPerformanceRecord) {
        {
            let mut by_model = self.by_model.write().expect("planner stats lock poisoned");
            let per_model = by_model.entry(record.model_id.clone()).or_default();
            let stats = per_model.entry(record.strategy_name.clone()).or_default();
            reinforce(stats, record.observed_latency_ms, record.succeeded, self.alpha);
            // I4: every update renormalizes across the whole model's
            // strategies, not just the one just observed.
            renormalize_weights(per_model);
        }
        let mut history = self.history.write().expect("planner stats lock poisoned");
        history.push(record);
        // Bounded ring: drop the oldest entry rather than growing unboundedly.
        if history.len() > self.history_capacity {
            history.remove(0);
        }
    }

    pub fn snapshot(&self) -> StrategyStatsByModel {
        self.by_model.read().expect("planner stats lock poisoned").clone()
    }

    pub fn stats_for(&self, model_id: &str, strategy_name: &str) -> Option<StrategyStats> {
        self.by_model
            .read()
            .expect("planner stats lock poisoned")
            .get(model_id)
            .and_then(|m| m.get(strategy_name))
            .cloned()
    }

    pub fn history_len(&self) -> usize {
        self.history.read().expect("planner stats lock poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_updates_ema_for_that_model_and_strategy() {
        let stats = PlannerStats::new(&PlannerConfig::default());
        stats.record(StrategyPerformanceRecord {
            strategy_name: "layer-range".into(),
            model_id: "m1".into(),
            observed_latency_ms: 42.0,
            succeeded: true,
        });
        let s = stats.stats_for("m1", "layer-range").unwrap();
        assert_eq!(s.ema_latency_ms, 42.0);
    }

    #[test]
    fn history_ring_is_bounded() {
        let config = PlannerConfig {
            performance_history_capacity: 2,
            ..PlannerConfig::default()
        };
        let stats = PlannerStats::new(&config);
        for i in 0..5 {
            stats.record(StrategyPerformanceRecord {
                strategy_name: "layer-range".into(),
                model_id: "m1".into(),
                observed_latency_ms: i as f64,
                succeeded: true,
            });
        }
        assert_eq!(stats.history_len(), 2);
    }
}
