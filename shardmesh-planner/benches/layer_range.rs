use criterion::{criterion_group, criterion_main, Criterion};
use uuid::Uuid;

use shardmesh_planner::config::PlannerConfig;
use shardmesh_planner::strategy::{LayerRangeStrategy, Strategy};
use shardmesh_planner::{ModelDescriptor, NodeCapability, PartitionTask};

fn bench_layer_range_assignment(c: &mut Criterion) {
    let task = PartitionTask {
        task_id: Uuid::new_v4(),
        model: ModelDescriptor {
            model_id: "bench-model".into(),
            parameter_count: 70_000_000_000,
            layer_count: 80,
            hidden_size: 8192,
            attention_heads: 64,
            weights_size_bytes: 140_000_000_000,
            supports_tensor_parallel: true,
        },
        candidate_nodes: (0..32).map(|i| NodeCapability::uniform(format!("node-{i}"))).collect(),
        requested_strategy: None,
        context_length: 4096,
        batch_size: 8,
    };
    let config = PlannerConfig::default();
    c.bench_function("layer_range_partition_32_nodes", |b| {
        b.iter(|| LayerRangeStrategy.partition(&task, &config))
    });
}

criterion_group!(benches, bench_layer_range_assignment);
criterion_main!(benches);
