//! Partition planner orchestration (component C4).
//!
//! Mirrors the teacher's query engine's role: a thin coordinator that owns
//! the expensive subsystems (here the strategy registry and the
//! performance-statistics table) behind `Arc` handles and exposes one
//! high-level entry point, `plan`.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use tracing::{debug, info};

use crate::config::PlannerConfig;
use crate::optimizer::rewrite_and_score;
use crate::stats::PlannerStats;
use crate::strategy::{select_adaptive, StrategyRegistry};
use crate::types::{PartitionPlan, PartitionTask, StrategyPerformanceRecord};

pub struct PartitionPlanner {
    config: PlannerConfig,
    registry: Arc<StrategyRegistry>,
    stats: Arc<PlannerStats>,
}

impl PartitionPlanner {
    pub fn new(config: PlannerConfig) -> Self {
        let stats = Arc::new(PlannerStats::new(&config));
        info!(
            min_parameters_to_partition = config.min_parameters_to_partition,
            "partition planner initialized"
        );
        Self {
            config,
            registry: Arc::new(StrategyRegistry::with_defaults()),
            stats,
        }
    }

    pub fn stats(&self) -> Arc<PlannerStats> {
        Arc::clone(&self.stats)
    }

    /// Selects a strategy, builds its plan, scores it, and returns the best
    /// one. When `task.requested_strategy` names a strategy explicitly that
    /// strategy is used if it can handle the task; otherwise every
    /// applicable strategy is tried and the adaptive selector breaks ties
    /// using EMA history, falling back to lowest estimated latency when no
    /// history exists yet for any candidate.
    pub fn plan(&self, task: &PartitionTask) -> Result<PartitionPlan> {
        if task.model.parameter_count < self.config.min_parameters_to_partition {
            return Err(anyhow!(
                "model {} has {} parameters, below the partitioning threshold",
                task.model.model_id,
                task.model.parameter_count
            ));
        }

        let candidates = self.registry.candidates_for(task);
        if candidates.is_empty() {
            return Err(anyhow!(
                "no viable partitioning strategy for model {} with {} candidate nodes",
                task.model.model_id,
                task.candidate_nodes.len()
            ));
        }

        let chosen = if let Some(requested) = &task.requested_strategy {
            candidates
                .iter()
                .find(|s| s.name() == requested)
                .copied()
                .ok_or_else(|| anyhow!("requested strategy {requested} cannot handle this task"))?
        } else {
            let stats_snapshot = self.stats.snapshot();
            select_adaptive(&candidates, task, &stats_snapshot, &self.config)
                .ok_or_else(|| anyhow!("adaptive selection produced no candidate"))?
        };

        debug!(strategy = chosen.name(), task_id = %task.task_id, "strategy selected");
        let raw_plan = chosen.partition(task, &self.config);
        rewrite_and_score(raw_plan, task, &self.config)
            .ok_or_else(|| anyhow!("strategy {} produced an empty plan", chosen.name()))
    }

    pub fn record_outcome(&self, record: StrategyPerformanceRecord) {
        self.stats.record(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ModelDescriptor, NodeCapability};
    use uuid::Uuid;

    fn task() -> PartitionTask {
        PartitionTask {
            task_id: Uuid::new_v4(),
            model: ModelDescriptor {
                model_id: "llama-70b".into(),
                parameter_count: 70_000_000_000,
                layer_count: 80,
                hidden_size: 8192,
                attention_heads: 64,
                weights_size_bytes: 140_000_000_000,
                supports_tensor_parallel: true,
            },
            candidate_nodes: vec![
                NodeCapability::uniform("n1"),
                NodeCapability::uniform("n2"),
                NodeCapability::uniform("n3"),
                NodeCapability::uniform("n4"),
            ],
            requested_strategy: None,
            context_length: 4096,
            batch_size: 8,
        }
    }

    #[test]
    fn small_model_is_rejected() {
        let planner = PartitionPlanner::new(PlannerConfig::default());
        let mut t = task();
        t.model.parameter_count = 10_000_000;
        assert!(planner.plan(&t).is_err());
    }

    #[test]
    fn plan_selects_a_registered_strategy() {
        let planner = PartitionPlanner::new(PlannerConfig::default());
        let plan = planner.plan(&task()).unwrap();
        assert!(!plan.partitions.is_empty());
        assert!(planner
            .registry
            .names()
            .contains(&plan.strategy_name.as_str()));
    }

    #[test]
    fn explicit_strategy_request_is_honored() {
        let planner = PartitionPlanner::new(PlannerConfig::default());
        let mut t = task();
        t.requested_strategy = Some("data-shard".to_string());
        let plan = planner.plan(&t).unwrap();
        assert_eq!(plan.strategy_name, "data-shard");
    }

    #[test]
    fn unsupported_requested_strategy_errors() {
        let planner = PartitionPlanner::new(PlannerConfig::default());
        let mut t = task();
        t.candidate_nodes = vec![NodeCapability::uniform("n1")];
        t.requested_strategy = Some("tensor-parallel".to_string());
        assert!(planner.plan(&t).is_err());
    }
}
