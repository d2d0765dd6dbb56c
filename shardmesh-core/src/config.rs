//! Aggregate configuration for the node runtime.
//!
//! Every nested `*Config`/`*Policy` type already carries the documented
//! default from its own crate; this module's job is purely to compose them,
//! validate cross-field invariants, and apply a thin environment-variable
//! overlay. File/YAML loading is explicitly out of scope (§6.3 note) — that
//! stays an external concern.

use std::time::Duration;

use thiserror::Error;

use shardmesh_autoscaler::ScalingPolicy;
use shardmesh_consensus::types::ConsensusConfig;
use shardmesh_planner::PlannerConfig;
use shardmesh_scheduler::SchedulerConfig;
use shardmesh_transport::NetworkConfig;

use crate::types::RuntimeMode;

#[derive(Debug, Clone)]
pub struct NodeSettings {
    /// Auto-generated if empty, per §6.3.
    pub id: Option<String>,
    pub name: String,
    pub region: String,
    pub zone: String,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            id: None,
            name: "shardmesh-node".to_string(),
            region: "local".to_string(),
            zone: "local".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClusterSettings {
    pub bootstrap: bool,
    pub peers: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub mode: RuntimeMode,
    pub node: NodeSettings,
    pub cluster: ClusterSettings,
    pub consensus: ConsensusConfig,
    pub network: NetworkConfig,
    pub planner: PlannerConfig,
    pub scheduler: SchedulerConfig,
    pub autoscaling: ScalingPolicy,
    pub shutdown_timeout: Duration,
    pub join_retries: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mode: RuntimeMode::default(),
            node: NodeSettings::default(),
            cluster: ClusterSettings::default(),
            consensus: ConsensusConfig::default(),
            network: NetworkConfig::default(),
            planner: PlannerConfig::default(),
            scheduler: SchedulerConfig::default(),
            autoscaling: ScalingPolicy::default(),
            shutdown_timeout: Duration::from_secs(30),
            join_retries: 3,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("autoscaling.max_instances ({max}) is below autoscaling.min_instances ({min})")]
    InstanceRangeInverted { min: usize, max: usize },
    #[error("autoscaling.target_cpu_percent must be in (0, 100], got {0}")]
    InvalidTargetCpu(f64),
    #[error("scheduler.per_key_queue_depth must be greater than zero")]
    ZeroQueueDepth,
    #[error("consensus.election_timeout_min must be less than election_timeout_max")]
    ElectionTimeoutInverted,
    #[error("coordinator mode requires cluster.bootstrap to be true")]
    CoordinatorWithoutBootstrap,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.autoscaling.max_instances < self.autoscaling.min_instances {
            return Err(ConfigError::InstanceRangeInverted {
                min: self.autoscaling.min_instances,
                max: self.autoscaling.max_instances,
            });
        }
        if !(0.0..=100.0).contains(&self.autoscaling.target_cpu_percent)
            || self.autoscaling.target_cpu_percent == 0.0
        {
            return Err(ConfigError::InvalidTargetCpu(self.autoscaling.target_cpu_percent));
        }
        if self.scheduler.per_key_queue_depth == 0 {
            return Err(ConfigError::ZeroQueueDepth);
        }
        if self.consensus.election_timeout_min >= self.consensus.election_timeout_max {
            return Err(ConfigError::ElectionTimeoutInverted);
        }
        if matches!(self.mode, RuntimeMode::Coordinator) && !self.cluster.bootstrap {
            return Err(ConfigError::CoordinatorWithoutBootstrap);
        }
        Ok(())
    }

    /// Applies a small, explicit set of environment-variable overrides on
    /// top of [`AppConfig::default`] using the `config` crate purely as the
    /// environment-source reader — there is no file layer underneath it.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let built = config::Config::builder()
            .add_source(config::Environment::with_prefix("SHARDMESH").separator("__"))
            .build();
        let Ok(source) = built else {
            config.validate()?;
            return Ok(config);
        };

        if let Ok(id) = source.get_string("node.id") {
            config.node.id = Some(id);
        }
        if let Ok(name) = source.get_string("node.name") {
            config.node.name = name;
        }
        if let Ok(region) = source.get_string("node.region") {
            config.node.region = region;
        }
        if let Ok(zone) = source.get_string("node.zone") {
            config.node.zone = zone;
        }
        if let Ok(bootstrap) = source.get_bool("cluster.bootstrap") {
            config.cluster.bootstrap = bootstrap;
        }
        if let Ok(peers) = source.get_string("cluster.peers") {
            config.cluster.peers = peers.split(',').map(str::to_string).filter(|s| !s.is_empty()).collect();
        }
        if let Ok(mode) = source.get_string("node.mode") {
            config.mode = match mode.to_ascii_lowercase().as_str() {
                "node" => RuntimeMode::Node,
                "coordinator" => RuntimeMode::Coordinator,
                _ => RuntimeMode::Standalone,
            };
        }
        if let Ok(min) = source.get_int("autoscaling.min_instances") {
            config.autoscaling.min_instances = min.max(0) as usize;
        }
        if let Ok(max) = source.get_int("autoscaling.max_instances") {
            config.autoscaling.max_instances = max.max(0) as usize;
        }

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn inverted_instance_range_is_rejected() {
        let mut config = AppConfig::default();
        config.autoscaling.min_instances = 10;
        config.autoscaling.max_instances = 2;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InstanceRangeInverted { .. })
        ));
    }

    #[test]
    fn coordinator_mode_requires_bootstrap() {
        let mut config = AppConfig::default();
        config.mode = RuntimeMode::Coordinator;
        config.cluster.bootstrap = false;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::CoordinatorWithoutBootstrap)
        ));
    }

    #[test]
    fn zero_queue_depth_is_rejected() {
        let mut config = AppConfig::default();
        config.scheduler.per_key_queue_depth = 0;
        assert!(matches!(config.validate(), Err(ConfigError::ZeroQueueDepth)));
    }
}
