//! Auto-scaler control loop (component C6).
//!
//! Runs once per `metrics_interval`. A cooldown gate prevents oscillation:
//! once a scaling action fires, no further action is taken until the
//! cooldown elapses, *unless* the effector call itself errored — a failed
//! scale attempt must not block the next attempt behind a cooldown it never
//! benefited from.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::forecaster::Forecaster;
use crate::types::{Effector, ResourceSample, ScalingEvent, ScalingEventType, ScalingPolicy};

pub struct AutoScaler {
    policy: RwLock<ScalingPolicy>,
    effector: Arc<dyn Effector>,
    forecaster: Mutex<Forecaster>,
    last_scaled_at: Mutex<Option<Instant>>,
    current_instances: AtomicUsize,
    events: Mutex<Vec<ScalingEvent>>,
}

impl AutoScaler {
    pub fn new(policy: ScalingPolicy, effector: Arc<dyn Effector>, initial_instances: usize) -> Self {
        Self {
            policy: RwLock::new(policy),
            effector,
            forecaster: Mutex::new(Forecaster::new(0.3)),
            last_scaled_at: Mutex::new(None),
            current_instances: AtomicUsize::new(initial_instances),
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn current_instances(&self) -> usize {
        self.current_instances.load(Ordering::SeqCst)
    }

    pub async fn events(&self) -> Vec<ScalingEvent> {
        self.events.lock().await.clone()
    }

    pub fn spawn_control_loop(self: &Arc<Self>) {
        let scaler = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let interval = scaler.policy.read().await.metrics_interval;
                tokio::time::sleep(interval).await;
                // A real deployment feeds real samples in; this loop is the
                // scheduling backbone and is exercised directly by tests via
                // `tick`.
                let _ = scaler;
            }
        });
    }

    /// One control-loop iteration. Exposed directly so it can be driven
    /// deterministically by tests and by a real metrics-sampling caller.
    pub async fn tick(&self, sample: ResourceSample) -> Option<ScalingEvent> {
        let policy = self.policy.read().await.clone();
        if !policy.enabled {
            return None;
        }

        {
            let mut forecaster = self.forecaster.lock().await;
            forecaster.observe(&sample);
        }

        let (cpu_for_decision, memory_for_decision) = if policy.predictive_scaling {
            let forecaster = self.forecaster.lock().await;
            match forecaster.predict() {
                Some(prediction) if prediction.confidence >= policy.prediction_accuracy_threshold => (
                    prediction.predicted_cpu_percent,
                    prediction.predicted_memory_utilization,
                ),
                _ => (sample.cpu_percent, sample.memory_utilization),
            }
        } else {
            (sample.cpu_percent, sample.memory_utilization)
        };

        let current = self.current_instances();
        let target = target_replicas(current, cpu_for_decision, &policy);

        if target == current {
            return None;
        }

        let in_cooldown = {
            let last = self.last_scaled_at.lock().await;
            matches!(*last, Some(t) if t.elapsed() < policy.cooldown)
        };
        if in_cooldown {
            return None;
        }

        let event_type = if target > current {
            ScalingEventType::ScaleUp
        } else {
            ScalingEventType::ScaleDown
        };

        match self.effector.set_instance_count(target).await {
            Ok(()) => {
                self.current_instances.store(target, Ordering::SeqCst);
                *self.last_scaled_at.lock().await = Some(Instant::now());
                let event = ScalingEvent {
                    event_type,
                    from_instances: current,
                    to_instances: target,
                    reason: format!(
                        "cpu={cpu_for_decision:.1}% memory={memory_for_decision:.1} target_cpu={}% scale_up={} scale_down={}",
                        policy.target_cpu_percent, policy.scale_up_threshold, policy.scale_down_threshold
                    ),
                };
                info!(?event.event_type, from = event.from_instances, to = event.to_instances, "scaled");
                self.events.lock().await.push(event.clone());
                Some(event)
            }
            Err(e) => {
                // No cooldown applied: this attempt never actually scaled.
                warn!(error = %e, "effector call failed, not applying cooldown");
                None
            }
        }
    }
}

/// §4.6 step 3's dead band: only scale up once `cpu_percent` clears
/// `scale_up_threshold`, only scale down once it drops below
/// `scale_down_threshold`, and leave `current` alone in between so a
/// reading hovering near the target doesn't thrash the fleet.
fn target_replicas(current: usize, cpu_percent: f64, policy: &ScalingPolicy) -> usize {
    let ratio = cpu_percent / policy.target_cpu_percent.max(1.0);
    let raw_target = if cpu_percent > policy.scale_up_threshold {
        (current as f64 * ratio).ceil() as i64
    } else if cpu_percent < policy.scale_down_threshold {
        (current as f64 * ratio).floor() as i64
    } else {
        current as i64
    };
    raw_target
        .clamp(policy.min_instances as i64, policy.max_instances as i64)
        .max(0) as usize
}
