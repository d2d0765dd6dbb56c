//! Startup-path error taxonomy (§7): the only C7 errors that translate
//! directly into a process exit code rather than staying internal.

use thiserror::Error;

use crate::config::ConfigError;
use crate::types::ExitReason;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(#[from] ConfigError),
    #[error("failed to join cluster after {retries} attempts: {reason}")]
    ClusterJoinFailed { retries: u32, reason: String },
    #[error("fatal consensus error: {0}")]
    FatalConsensus(String),
}

impl StartupError {
    pub fn exit_reason(&self) -> ExitReason {
        match self {
            StartupError::ConfigInvalid(_) => ExitReason::ConfigInvalid,
            StartupError::ClusterJoinFailed { .. } => ExitReason::ClusterJoinFailure,
            StartupError::FatalConsensus(_) => ExitReason::FatalConsensusError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_invalid_maps_to_exit_code_one() {
        let err = StartupError::ConfigInvalid(ConfigError::ZeroQueueDepth);
        assert_eq!(err.exit_reason().code(), 1);
    }

    #[test]
    fn cluster_join_failure_maps_to_exit_code_two() {
        let err = StartupError::ClusterJoinFailed {
            retries: 3,
            reason: "no reachable seed peers".to_string(),
        };
        assert_eq!(err.exit_reason().code(), 2);
    }
}
