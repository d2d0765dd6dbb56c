//! Distributed scheduler (component C5).
//!
//! Builds a partition task, asks the planner for a plan, and dispatches
//! each partition to its assigned node's [`LocalRunner`] respecting the
//! plan's dependency DAG — partitions with no unmet dependency run
//! concurrently, the next layer starts only once its dependencies report
//! back. A partition that fails is retried once; a second failure aborts
//! the whole plan and falls back to running locally if the model is small
//! enough to do so.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use shardmesh_planner::{PartitionPlanner, PartitionTask, StrategyPerformanceRecord};

use crate::errors::SchedulerError;
use crate::types::{DispatchOutcome, LocalRunner, SchedulerConfig};

pub struct DistributedScheduler {
    config: SchedulerConfig,
    planner: Arc<PartitionPlanner>,
    runner: Arc<dyn LocalRunner>,
    /// One semaphore per (node, model, layer-range) key, created lazily and
    /// kept for the scheduler's lifetime — this is the concurrency gate
    /// from §5: a bounded queue per key, `Busy` on overflow.
    gates: DashMap<String, Arc<Semaphore>>,
}

impl DistributedScheduler {
    pub fn new(config: SchedulerConfig, planner: Arc<PartitionPlanner>, runner: Arc<dyn LocalRunner>) -> Self {
        Self {
            config,
            planner,
            runner,
            gates: DashMap::new(),
        }
    }

    fn gate_key(node_id: &str, model_id: &str, layer_range: Option<(u32, u32)>) -> String {
        match layer_range {
            Some((start, end)) => format!("{node_id}:{model_id}:{start}-{end}"),
            None => format!("{node_id}:{model_id}"),
        }
    }

    fn gate_for(&self, key: &str) -> Arc<Semaphore> {
        let entry = self
            .gates
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.config.per_key_queue_depth)));
        Arc::clone(&entry)
    }

    /// `ShouldDistribute` heuristic: a task whose estimated partition count
    /// would not even clear the single-node threshold runs locally.
    pub fn should_distribute(&self, task: &PartitionTask) -> bool {
        task.model.parameter_count > 0
            && task.candidate_nodes.len() >= self.config.distribute_above_partitions
    }

    pub async fn execute(&self, task: PartitionTask) -> Result<Vec<u8>, SchedulerError> {
        if !self.should_distribute(&task) {
            return self.run_locally(&task).await;
        }

        let plan = self.planner.plan(&task).map_err(|e| {
            warn!(error = %e, "planner could not produce a plan");
            SchedulerError::PlannerNoViableStrategy
        })?;

        let mut completed: Vec<usize> = Vec::new();
        let mut results: Vec<Vec<u8>> = Vec::new();
        let total = plan.partitions.len();

        while completed.len() < total {
            let ready = plan.ready_after(&completed);
            if ready.is_empty() {
                return Err(SchedulerError::PartitionFailed(
                    completed.len(),
                    "dependency cycle or unreachable partition in plan".to_string(),
                ));
            }
            let mut layer_results = Vec::new();
            for partition in ready {
                let key = Self::gate_key(&partition.node_id, &task.model.model_id, partition.layer_range);
                let gate = self.gate_for(&key);
                let permit = gate.try_acquire_owned().map_err(|_| SchedulerError::Busy)?;

                let started = Instant::now();
                let payload = serde_json::to_vec(&task.model.model_id).unwrap_or_default();
                let attempt = self.dispatch_with_retry(&partition.node_id, payload).await;
                drop(permit);
                let elapsed = started.elapsed();

                let outcome = DispatchOutcome {
                    partition_index: partition.index,
                    node_id: partition.node_id.clone(),
                    latency_ms: elapsed.as_secs_f64() * 1000.0,
                    succeeded: attempt.is_ok(),
                };
                debug!(?outcome, "partition dispatch outcome");
                self.planner.record_outcome(StrategyPerformanceRecord {
                    strategy_name: plan.strategy_name.clone(),
                    model_id: task.model.model_id.clone(),
                    observed_latency_ms: outcome.latency_ms,
                    succeeded: outcome.succeeded,
                });

                match attempt {
                    Ok(bytes) => {
                        layer_results.push((partition.index, bytes));
                    }
                    Err(e) => {
                        // §4.5.3 step 5: the retry inside `dispatch_with_retry`
                        // already failed once on the same node, so this is the
                        // partition's second failure. Cancel the rest of the
                        // plan (the remaining `ready` partitions and every
                        // later layer are simply never dispatched) and fall
                        // back to the local runner if configured to.
                        if self.config.failback_to_local {
                            warn!(
                                partition = partition.index,
                                error = %e,
                                "partition failed twice, cancelling plan and falling back to local runner"
                            );
                            return self.run_locally(&task).await.map_err(|_| {
                                SchedulerError::ResourceExhausted(format!(
                                    "local fallback failed after partition {} failed: {e}",
                                    partition.index
                                ))
                            });
                        }
                        return Err(SchedulerError::PartitionFailed(partition.index, e.to_string()));
                    }
                }
            }
            for (index, bytes) in layer_results {
                completed.push(index);
                results.push(bytes);
            }
        }

        Ok(results.into_iter().flatten().collect())
    }

    async fn dispatch_with_retry(&self, node_id: &str, payload: Vec<u8>) -> anyhow::Result<Vec<u8>> {
        let mut attempts = 0;
        loop {
            match tokio::time::timeout(
                self.config.dispatch_timeout,
                self.runner.run_partition(node_id, payload.clone()),
            )
            .await
            {
                Ok(Ok(bytes)) => return Ok(bytes),
                Ok(Err(e)) if attempts < self.config.max_retries => {
                    attempts += 1;
                    warn!(node = node_id, attempt = attempts, error = %e, "retrying partition dispatch");
                    continue;
                }
                Ok(Err(e)) => return Err(e),
                Err(_) if attempts < self.config.max_retries => {
                    attempts += 1;
                    continue;
                }
                Err(_) => return Err(anyhow::anyhow!("dispatch to {node_id} timed out")),
            }
        }
    }

    /// Cancels any outstanding plans (§4.7.3 step 3) by delegating to the
    /// underlying local runner's own shutdown — there is no separate
    /// in-flight-plan registry to drain yet since `execute` does not return
    /// until every partition it dispatched has resolved.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.runner.shutdown().await
    }

    async fn run_locally(&self, task: &PartitionTask) -> Result<Vec<u8>, SchedulerError> {
        info!(model = %task.model.model_id, "running task on a single local runner");
        let payload = serde_json::to_vec(&task.model.model_id).unwrap_or_default();
        self.runner
            .run_partition("local", payload)
            .await
            .map_err(|e| SchedulerError::PartitionFailed(0, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use shardmesh_planner::{ModelDescriptor, NodeCapability, PlannerConfig};
    use uuid::Uuid;

    struct EchoRunner;

    #[async_trait]
    impl LocalRunner for EchoRunner {
        async fn run_partition(&self, _node_id: &str, payload: Vec<u8>) -> anyhow::Result<Vec<u8>> {
            Ok(payload)
        }
        async fn shutdown(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn task(nodes: usize, params: u64) -> PartitionTask {
        PartitionTask {
            task_id: Uuid::new_v4(),
            model: ModelDescriptor {
                model_id: "m1".into(),
                parameter_count: params,
                layer_count: 32,
                hidden_size: 4096,
                attention_heads: 32,
                weights_size_bytes: 14_000_000_000,
                supports_tensor_parallel: false,
            },
            candidate_nodes: (0..nodes).map(|i| NodeCapability::uniform(format!("n{i}"))).collect(),
            requested_strategy: Some("layer-range".to_string()),
            context_length: 512,
            batch_size: 1,
        }
    }

    #[tokio::test]
    async fn small_task_runs_locally_without_a_plan() {
        let scheduler = DistributedScheduler::new(
            SchedulerConfig {
                distribute_above_partitions: 1,
                ..SchedulerConfig::default()
            },
            Arc::new(PartitionPlanner::new(PlannerConfig::default())),
            Arc::new(EchoRunner),
        );
        let mut t = task(0, 70_000_000_000);
        t.candidate_nodes.clear();
        assert!(!scheduler.should_distribute(&t));
        assert!(scheduler.execute(t).await.is_ok());
    }

    #[tokio::test]
    async fn distributed_task_dispatches_across_partitions() {
        let scheduler = DistributedScheduler::new(
            SchedulerConfig::default(),
            Arc::new(PartitionPlanner::new(PlannerConfig::default())),
            Arc::new(EchoRunner),
        );
        let result = scheduler.execute(task(4, 70_000_000_000)).await;
        assert!(result.is_ok());
    }

    /// Fails every remote partition but succeeds when dispatched to "local",
    /// so it exercises the fall-back-to-local path without a real backend.
    struct RemoteOnlyFailsRunner;

    #[async_trait]
    impl LocalRunner for RemoteOnlyFailsRunner {
        async fn run_partition(&self, node_id: &str, payload: Vec<u8>) -> anyhow::Result<Vec<u8>> {
            if node_id == "local" {
                Ok(payload)
            } else {
                Err(anyhow::anyhow!("node {node_id} unreachable"))
            }
        }
        async fn shutdown(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn second_failure_falls_back_to_local_runner_when_enabled() {
        let scheduler = DistributedScheduler::new(
            SchedulerConfig {
                max_retries: 0,
                failback_to_local: true,
                ..SchedulerConfig::default()
            },
            Arc::new(PartitionPlanner::new(PlannerConfig::default())),
            Arc::new(RemoteOnlyFailsRunner),
        );
        let result = scheduler.execute(task(4, 70_000_000_000)).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn second_failure_surfaces_partition_failed_when_fallback_disabled() {
        let scheduler = DistributedScheduler::new(
            SchedulerConfig {
                max_retries: 0,
                failback_to_local: false,
                ..SchedulerConfig::default()
            },
            Arc::new(PartitionPlanner::new(PlannerConfig::default())),
            Arc::new(RemoteOnlyFailsRunner),
        );
        let result = scheduler.execute(task(4, 70_000_000_000)).await;
        assert!(matches!(result, Err(SchedulerError::PartitionFailed(_, _))));
    }
}
