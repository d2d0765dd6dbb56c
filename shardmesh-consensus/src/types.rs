use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type PeerId = String;
pub type Term = u64;
pub type LogIndex = u64;

#[derive(Debug, Clone)]
pub struct ConsensusConfig {
    pub election_timeout_min: Duration,
    pub election_timeout_max: Duration,
    pub heartbeat_timeout: Duration,
    pub snapshot_interval: u64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            election_timeout_min: Duration::from_millis(150),
            election_timeout_max: Duration::from_millis(300),
            heartbeat_timeout: Duration::from_millis(50),
            snapshot_interval: 10_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Follower,
    Candidate,
    Leader,
}

/// State-machine mutations. Replaces the document-store CRUD of the
/// original `Operation` enum with the cluster-membership and scheduling
/// mutations this log actually replicates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Command {
    JoinNode {
        node_id: String,
        capabilities: serde_json::Value,
    },
    LeaveNode {
        node_id: String,
    },
    UpdateCapacity {
        node_id: String,
        capacity: serde_json::Value,
    },
    PlaceModel {
        model_id: String,
        node_id: String,
        partition_index: usize,
    },
    EvictModel {
        model_id: String,
        node_id: String,
    },
    UpdatePolicy {
        key: String,
        value: serde_json::Value,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub term: Term,
    pub index: LogIndex,
    pub command: Command,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteRequest {
    pub term: Term,
    pub candidate_id: PeerId,
    pub last_log_index: LogIndex,
    pub last_log_term: Term,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteResponse {
    pub term: Term,
    pub vote_granted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesRequest {
    pub term: Term,
    pub leader_id: PeerId,
    pub prev_log_index: LogIndex,
    pub prev_log_term: Term,
    pub entries: Vec<LogEntry>,
    pub leader_commit: LogIndex,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesResponse {
    pub term: Term,
    pub success: bool,
    /// Index of the last entry this follower now has, to let the leader
    /// fast-forward `next_index` instead of retrying one entry at a time.
    pub match_index: LogIndex,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ConsensusMessage {
    RequestVote(RequestVoteRequest),
    RequestVoteResponse(RequestVoteResponse),
    AppendEntries(AppendEntriesRequest),
    AppendEntriesResponse(AppendEntriesResponse),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommittedEntry {
    pub id: Uuid,
    pub index: LogIndex,
    pub command: Command,
}
