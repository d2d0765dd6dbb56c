//! Lightweight predictive forecaster: exponential smoothing over observed
//! resource samples, same EMA texture as the planner's strategy-performance
//! learning. Confidence grows with the number of samples seen so far and is
//! penalized by how volatile recent samples have been, so a newly-started
//! node with one noisy sample does not get to claim high confidence.

use crate::types::{PredictionResult, ResourceSample};

pub struct Forecaster {
    alpha: f64,
    ema_cpu: Option<f64>,
    ema_memory: Option<f64>,
    variance_cpu: f64,
    sample_count: u64,
}

impl Forecaster {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha,
            ema_cpu: None,
            ema_memory: None,
            variance_cpu: 0.0,
            sample_count: 0,
        }
    }

    pub fn observe(&mut self, sample: &ResourceSample) {
        match self.ema_cpu {
            None => {
                self.ema_cpu = Some(sample.cpu_percent);
                self.ema_memory = Some(sample.memory_utilization);
            }
            Some(prev) => {
                let delta = sample.cpu_percent - prev;
                self.variance_cpu = self.alpha * delta * delta + (1.0 - self.alpha) * self.variance_cpu;
                self.ema_cpu = Some(self.alpha * sample.cpu_percent + (1.0 - self.alpha) * prev);
                self.ema_memory = Some(
                    self.alpha * sample.memory_utilization
                        + (1.0 - self.alpha) * self.ema_memory.unwrap_or(sample.memory_utilization),
                );
            }
        }
        self.sample_count += 1;
    }

    pub fn predict(&self) -> Option<PredictionResult> {
        let ema_cpu = self.ema_cpu?;
        let ema_memory = self.ema_memory?;
        let stability = 1.0 / (1.0 + self.variance_cpu.sqrt());
        let maturity = (self.sample_count as f64 / 10.0).min(1.0);
        Some(PredictionResult {
            predicted_cpu_percent: ema_cpu,
            predicted_memory_utilization: ema_memory,
            confidence: stability * maturity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_sets_prediction_directly() {
        let mut f = Forecaster::new(0.3);
        f.observe(&ResourceSample {
            cpu_percent: 50.0,
            memory_utilization: 0.4,
        });
        let p = f.predict().unwrap();
        assert_eq!(p.predicted_cpu_percent, 50.0);
    }

    #[test]
    fn confidence_grows_with_stable_samples() {
        let mut f = Forecaster::new(0.3);
        for _ in 0..15 {
            f.observe(&ResourceSample {
                cpu_percent: 50.0,
                memory_utilization: 0.4,
            });
        }
        let p = f.predict().unwrap();
        assert!(p.confidence > 0.9);
    }

    #[test]
    fn confidence_drops_with_volatile_samples() {
        let mut f = Forecaster::new(0.3);
        for i in 0..15 {
            let cpu = if i % 2 == 0 { 10.0 } else { 90.0 };
            f.observe(&ResourceSample {
                cpu_percent: cpu,
                memory_utilization: 0.4,
            });
        }
        let p = f.predict().unwrap();
        assert!(p.confidence < 0.5);
    }
}
