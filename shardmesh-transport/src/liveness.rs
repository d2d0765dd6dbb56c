//! Peer liveness tracking.
//!
//! A trimmed-down version of the connectivity-matrix idea: rather than
//! classifying the whole cluster into named partition-recovery strategies,
//! this only needs the single policy the consensus layer relies on — track
//! missed heartbeats per peer, mark a peer suspect after the configured
//! threshold, and let the consensus engine's own quorum math decide whether
//! the *local* node is on the majority side.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::types::{PeerId, PeerLiveness};

struct PeerRecord {
    last_heartbeat: Instant,
    missed: u32,
}

pub struct LivenessTracker {
    peers: DashMap<PeerId, PeerRecord>,
    heartbeat_interval: Duration,
    missed_before_suspect: u32,
}

impl LivenessTracker {
    pub fn new(heartbeat_interval: Duration, missed_before_suspect: u32) -> Self {
        Self {
            peers: DashMap::new(),
            heartbeat_interval,
            missed_before_suspect,
        }
    }

    pub fn record_heartbeat(&self, peer: PeerId) {
        self.peers.insert(
            peer,
            PeerRecord {
                last_heartbeat: Instant::now(),
                missed: 0,
            },
        );
    }

    /// Called once per `heartbeat_interval` tick. Any peer whose
    /// `last_heartbeat` predates the previous tick is counted as a miss.
    pub fn sweep(&self) -> Vec<PeerId> {
        let now = Instant::now();
        let mut newly_suspect = Vec::new();
        for mut entry in self.peers.iter_mut() {
            if now.duration_since(entry.last_heartbeat) > self.heartbeat_interval {
                entry.missed += 1;
                if entry.missed == self.missed_before_suspect {
                    newly_suspect.push(entry.key().clone());
                }
            }
        }
        newly_suspect
    }

    pub fn liveness(&self, peer: &PeerId) -> PeerLiveness {
        match self.peers.get(peer) {
            None => PeerLiveness::Unreachable,
            Some(record) if record.missed == 0 => PeerLiveness::Alive,
            Some(record) if record.missed < self.missed_before_suspect => PeerLiveness::Alive,
            Some(_) => PeerLiveness::Suspect,
        }
    }

    pub fn snapshot(&self) -> HashMap<PeerId, PeerLiveness> {
        self.peers
            .iter()
            .map(|entry| (entry.key().clone(), self.liveness(entry.key())))
            .collect()
    }

    /// A quorum of `total_peers` (including self) is reachable iff strictly
    /// more than half are not `Unreachable`/`Suspect`.
    pub fn has_quorum(&self, total_peers: usize) -> bool {
        let alive = self
            .peers
            .iter()
            .filter(|e| self.liveness(e.key()) == PeerLiveness::Alive)
            .count()
            + 1; // count self
        alive * 2 > total_peers
    }
}
