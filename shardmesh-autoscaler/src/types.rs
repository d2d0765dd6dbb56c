use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalingPolicy {
    pub enabled: bool,
    pub min_instances: usize,
    pub max_instances: usize,
    /// `target_utilization` from §4.6 step 3, expressed on the same 0-100
    /// scale as `cpu_percent` rather than spec's 0-1 ratio.
    pub target_cpu_percent: f64,
    /// Scale up once `cpu_percent` clears this (default 80, spec's 0.8).
    pub scale_up_threshold: f64,
    /// Scale down once `cpu_percent` drops below this (default 30, spec's 0.3).
    pub scale_down_threshold: f64,
    pub metrics_interval: Duration,
    pub cooldown: Duration,
    pub predictive_scaling: bool,
    pub prediction_accuracy_threshold: f64,
}

impl Default for ScalingPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            min_instances: 1,
            max_instances: 100,
            target_cpu_percent: 70.0,
            scale_up_threshold: 80.0,
            scale_down_threshold: 30.0,
            metrics_interval: Duration::from_secs(30),
            cooldown: Duration::from_secs(300),
            predictive_scaling: false,
            prediction_accuracy_threshold: 0.85,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScalingEventType {
    ScaleUp,
    ScaleDown,
    NoOp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalingEvent {
    pub event_type: ScalingEventType,
    pub from_instances: usize,
    pub to_instances: usize,
    pub reason: String,
}

/// §4.6 step 1: the two signals read from C3 (or an external metrics
/// source) each tick.
#[derive(Debug, Clone)]
pub struct ResourceSample {
    pub cpu_percent: f64,
    pub memory_utilization: f64,
}

#[derive(Debug, Clone)]
pub struct PredictionResult {
    pub predicted_cpu_percent: f64,
    pub predicted_memory_utilization: f64,
    pub confidence: f64,
}

/// The effector interface collapses to exactly the two operations §6.4
/// needs: set a replica count, and read the current one back. A
/// Kubernetes HPA or cloud-autoscaler adapter implements this without the
/// scaler needing to know anything about the backing platform.
#[async_trait::async_trait]
pub trait Effector: Send + Sync {
    async fn set_instance_count(&self, count: usize) -> anyhow::Result<()>;
    async fn current_instance_count(&self) -> anyhow::Result<usize>;
}
