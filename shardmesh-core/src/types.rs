//! Node runtime-specific types: the three deployment modes and the
//! process exit-code contract (§6.1), which belongs to the process
//! boundary even though the HTTP layer it fronts is out of scope.

use serde::{Deserialize, Serialize};

/// The three modes a node can run in (§4.7.1). Each gates which
/// subsystems the runtime constructs and starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuntimeMode {
    /// C1, C2, C6 disabled; C4 restricted to the no-op strategy; C5 always
    /// falls through to local execution.
    Standalone,
    /// All components enabled; consensus starts as a follower and waits to
    /// join an existing cluster via the configured seed peer list.
    Node,
    /// All components enabled; consensus bootstraps itself as the initial
    /// single-node leader and accepts joining followers.
    Coordinator,
}

impl RuntimeMode {
    pub fn transport_enabled(self) -> bool {
        !matches!(self, RuntimeMode::Standalone)
    }

    pub fn consensus_enabled(self) -> bool {
        !matches!(self, RuntimeMode::Standalone)
    }

    pub fn autoscaler_enabled(self) -> bool {
        !matches!(self, RuntimeMode::Standalone)
    }

    /// Standalone nodes restrict the planner to a no-op single-partition
    /// strategy instead of running the full strategy registry.
    pub fn planner_restricted_to_noop(self) -> bool {
        matches!(self, RuntimeMode::Standalone)
    }

    pub fn consensus_bootstrap(self) -> bool {
        matches!(self, RuntimeMode::Coordinator)
    }
}

impl Default for RuntimeMode {
    fn default() -> Self {
        RuntimeMode::Standalone
    }
}

/// Process exit codes (§6.1): the only part of the HTTP/process boundary
/// implemented here, since "reject invalid config" and "exit with the
/// right code" are process contract, not HTTP contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    CleanShutdown,
    ConfigInvalid,
    ClusterJoinFailure,
    FatalConsensusError,
}

impl ExitReason {
    pub fn code(self) -> i32 {
        match self {
            ExitReason::CleanShutdown => 0,
            ExitReason::ConfigInvalid => 1,
            ExitReason::ClusterJoinFailure => 2,
            ExitReason::FatalConsensusError => 3,
        }
    }
}
