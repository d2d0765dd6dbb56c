use thiserror::Error;

/// Client-visible branch of the error taxonomy. Internal-only failures
/// (consensus, cluster state) stay as `anyhow::Error` and never reach here.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("no viable partitioning strategy for this task")]
    PlannerNoViableStrategy,
    #[error("insufficient cluster resources to place this task")]
    PlannerInsufficientResources,
    #[error("quorum unavailable, cannot accept new work")]
    QuorumUnavailable,
    #[error("partition {0} timed out")]
    PartitionTimeout(usize),
    #[error("partition {0} failed: {1}")]
    PartitionFailed(usize, String),
    #[error("scheduler at capacity for this (node, model, layer-range)")]
    Busy,
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
    #[error("request cancelled")]
    Cancelled,
}

impl SchedulerError {
    /// HTTP status the (external) API layer should map this to.
    pub fn status_hint(&self) -> u16 {
        match self {
            SchedulerError::PlannerNoViableStrategy => 422,
            SchedulerError::PlannerInsufficientResources => 507,
            SchedulerError::QuorumUnavailable => 503,
            SchedulerError::PartitionTimeout(_) => 504,
            SchedulerError::PartitionFailed(_, _) => 502,
            SchedulerError::Busy => 429,
            SchedulerError::ResourceExhausted(_) => 507,
            SchedulerError::Cancelled => 499,
        }
    }
}
