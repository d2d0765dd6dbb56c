use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Peer identifier used by every crate below `shardmesh-core`. `shardmesh-core`
/// formats its richer `NodeId` (a UUID) into this same string so the two
/// never have to agree on a shared type and `shardmesh-transport` never has
/// to depend back on `shardmesh-core`.
pub type PeerId = String;

#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub bootstrap_peers: Vec<String>,
    pub max_connections: usize,
    pub dial_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub missed_heartbeats_before_suspect: u32,
    pub reorder_window: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bootstrap_peers: Vec::new(),
            max_connections: 50,
            dial_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(30),
            missed_heartbeats_before_suspect: 3,
            reorder_window: 64,
        }
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("peer {0} unreachable")]
    PeerUnreachable(PeerId),
    #[error("dial to {0} timed out")]
    DialTimeout(PeerId),
    #[error("not connected to any peers")]
    NoPeers,
}

/// Envelope carried over the wire. `sequence` is per-destination and strictly
/// increasing; receivers use it to bound the reorder window instead of
/// dropping out-of-order messages outright.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub from: PeerId,
    pub sequence: u64,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerLiveness {
    Alive,
    Suspect,
    Unreachable,
}
