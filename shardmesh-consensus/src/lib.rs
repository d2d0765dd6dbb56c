//! Leader-based replicated log for cluster membership and placement
//! decisions (components C2 and C3).
//!
//! A single elected leader per term appends [`Command`]s describing node
//! joins/leaves, capacity updates, and model placements, and replicates
//! them to followers. Once a majority has acknowledged an entry it is
//! applied to the [`cluster_state::ClusterStateStore`], which any
//! component can read without touching the log or the network.

pub mod cluster_state;
pub mod engine;
pub mod types;

pub use cluster_state::{ClusterStateSnapshot, ClusterStateStore, NodeView, PlacementView};
pub use engine::{spawn_engine, ConsensusEngine};
pub use types::{
    AppendEntriesRequest, AppendEntriesResponse, Command, ConsensusConfig, ConsensusMessage,
    LogEntry, LogIndex, NodeRole, PeerId, RequestVoteRequest, RequestVoteResponse, Term,
};
