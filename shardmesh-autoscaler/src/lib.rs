//! Predictive auto-scaler (component C6): watches per-resource utilization
//! and adjusts the instance count behind the `Effector` trait, with a
//! cooldown-gated control loop and optional EMA-based forecasting.

pub mod engine;
pub mod forecaster;
pub mod types;

pub use engine::AutoScaler;
pub use forecaster::Forecaster;
pub use types::{Effector, PredictionResult, ResourceSample, ScalingEvent, ScalingEventType, ScalingPolicy};
