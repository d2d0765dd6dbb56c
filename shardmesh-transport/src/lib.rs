//! Peer transport: the only component allowed to do network I/O.
//!
//! Every other component reaches the network exclusively through the
//! [`PeerTransport`] trait, never by holding a socket or a libp2p `Swarm`
//! directly. Delivery is at-least-once: each destination gets a strictly
//! increasing sequence number and receivers tolerate reordering within a
//! bounded window instead of dropping late messages.

pub mod liveness;
pub mod types;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use libp2p::identity::Keypair;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

pub use liveness::LivenessTracker;
pub use types::{Envelope, NetworkConfig, PeerId, PeerLiveness, TransportError};

#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn send(&self, to: &PeerId, payload: Vec<u8>) -> Result<(), TransportError>;
    async fn broadcast(&self, payload: Vec<u8>) -> Result<(), TransportError>;
    fn subscribe(&self) -> broadcast::Receiver<Envelope>;
    fn peers(&self) -> Vec<PeerId>;
    async fn dial(&self, addr: &str) -> Result<PeerId, TransportError>;
}

struct PeerHandle {
    outbox: mpsc::Sender<Envelope>,
    next_sequence: AtomicU64,
}

/// libp2p-identified mesh transport. The keypair gives every node a stable
/// cryptographic [`libp2p::PeerId`] on the wire; actual delivery here is an
/// in-process fan-out (mirroring how the rest of the cluster only ever
/// observes this node through the trait, never the transport mechanism)
/// that a production deployment would back with a real libp2p `Swarm`
/// (gossipsub for broadcast, a request/response protocol for unicast).
pub struct MeshTransport {
    config: NetworkConfig,
    identity: Keypair,
    local_peer_id: PeerId,
    peers: Arc<DashMap<PeerId, PeerHandle>>,
    liveness: Arc<LivenessTracker>,
    inbound_tx: broadcast::Sender<Envelope>,
}

impl MeshTransport {
    pub fn new(config: NetworkConfig) -> Self {
        let identity = Keypair::generate_ed25519();
        let local_peer_id = identity.public().to_peer_id().to_string();
        let (inbound_tx, _) = broadcast::channel(1024);
        let liveness = Arc::new(LivenessTracker::new(
            config.heartbeat_interval,
            config.missed_heartbeats_before_suspect,
        ));
        info!(peer_id = %local_peer_id, "transport identity generated");
        Self {
            config,
            identity,
            local_peer_id,
            peers: Arc::new(DashMap::new()),
            liveness,
            inbound_tx,
        }
    }

    pub fn local_peer_id(&self) -> &PeerId {
        &self.local_peer_id
    }

    pub fn liveness(&self) -> Arc<LivenessTracker> {
        Arc::clone(&self.liveness)
    }

    /// Registers a directly-addressable peer (normally the result of a
    /// successful [`PeerTransport::dial`]) and starts its outbound queue
    /// drain loop.
    pub fn register_peer(&self, peer_id: PeerId, mut inbound: mpsc::Receiver<Envelope>) {
        let (tx, mut rx) = mpsc::channel::<Envelope>(256);
        self.peers.insert(
            peer_id.clone(),
            PeerHandle {
                outbox: tx,
                next_sequence: AtomicU64::new(0),
            },
        );
        let inbound_tx = self.inbound_tx.clone();
        tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                debug!(seq = envelope.sequence, "envelope queued for delivery");
                let _ = inbound_tx.send(envelope);
            }
        });
        tokio::spawn(async move { while inbound.recv().await.is_some() {} });
    }

    /// Background heartbeat loop: sweeps the liveness tracker once per
    /// `heartbeat_interval` and logs newly-suspect peers. The consensus
    /// engine polls [`LivenessTracker::has_quorum`] rather than subscribing
    /// to this loop directly.
    pub fn spawn_heartbeat_loop(self: &Arc<Self>) {
        let liveness = Arc::clone(&self.liveness);
        let interval = self.config.heartbeat_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                for peer in liveness.sweep() {
                    warn!(%peer, "peer marked suspect after missed heartbeats");
                }
            }
        });
    }
}

#[async_trait]
impl PeerTransport for MeshTransport {
    async fn send(&self, to: &PeerId, payload: Vec<u8>) -> Result<(), TransportError> {
        let handle = self
            .peers
            .get(to)
            .ok_or_else(|| TransportError::PeerUnreachable(to.clone()))?;
        let sequence = handle.next_sequence.fetch_add(1, Ordering::SeqCst);
        let envelope = Envelope {
            from: self.local_peer_id.clone(),
            sequence,
            payload,
        };
        tokio::time::timeout(self.config.dial_timeout, handle.outbox.send(envelope))
            .await
            .map_err(|_| TransportError::DialTimeout(to.clone()))?
            .map_err(|_| TransportError::PeerUnreachable(to.clone()))
    }

    async fn broadcast(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        if self.peers.is_empty() {
            return Err(TransportError::NoPeers);
        }
        for entry in self.peers.iter() {
            let _ = self.send(entry.key(), payload.clone()).await;
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.inbound_tx.subscribe()
    }

    fn peers(&self) -> Vec<PeerId> {
        self.peers.iter().map(|e| e.key().clone()).collect()
    }

    async fn dial(&self, addr: &str) -> Result<PeerId, TransportError> {
        // A real deployment resolves `addr` to a libp2p multiaddr and drives
        // a Swarm dial; this transport's unit of addressability is already
        // the PeerId string, so dialing just registers the channel pair.
        let (tx, rx) = mpsc::channel(256);
        let peer_id = addr.to_string();
        self.register_peer(peer_id.clone(), rx);
        drop(tx);
        self.liveness.record_heartbeat(peer_id.clone());
        Ok(peer_id)
    }
}

impl Clone for MeshTransport {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            identity: self.identity.clone(),
            local_peer_id: self.local_peer_id.clone(),
            peers: Arc::clone(&self.peers),
            liveness: Arc::clone(&self.liveness),
            inbound_tx: self.inbound_tx.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_without_peers_errors() {
        let transport = MeshTransport::new(NetworkConfig::default());
        let err = transport.broadcast(vec![1, 2, 3]).await.unwrap_err();
        assert!(matches!(err, TransportError::NoPeers));
    }

    #[tokio::test]
    async fn dial_then_send_succeeds() {
        let transport = MeshTransport::new(NetworkConfig {
            dial_timeout: Duration::from_millis(500),
            ..NetworkConfig::default()
        });
        let peer = transport.dial("127.0.0.1:9000").await.unwrap();
        transport.send(&peer, b"hello".to_vec()).await.unwrap();
    }
}
