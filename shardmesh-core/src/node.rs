//! Node identity: the local process's address in the cluster and the
//! metadata/capability set it advertises to peers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shardmesh_security::{PublicKey, SigningContext};

use crate::config::NodeSettings;
use crate::types::RuntimeMode;

/// Unique identifier for a node in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub Uuid);

impl NodeId {
    pub fn generate() -> Self {
        NodeId(Uuid::new_v4())
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for NodeId {
    fn from(uuid: Uuid) -> Self {
        NodeId(uuid)
    }
}

impl From<NodeId> for Uuid {
    fn from(node_id: NodeId) -> Self {
        node_id.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    Starting,
    Active,
    Degraded,
    Leaving,
    Stopped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeMetadata {
    pub name: String,
    pub region: String,
    pub zone: String,
    pub version: String,
    pub started_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// The capability matrix from the node runtime's mode table (§4.7.1):
/// which subsystems this node participates in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NodeCapabilities {
    pub storage: bool,
    pub compute: bool,
    pub gateway: bool,
    pub bootstrap: bool,
    pub max_connections: usize,
}

impl NodeCapabilities {
    pub fn for_mode(mode: RuntimeMode, max_connections: usize) -> Self {
        Self {
            storage: true,
            compute: true,
            gateway: !matches!(mode, RuntimeMode::Standalone),
            bootstrap: matches!(mode, RuntimeMode::Coordinator),
            max_connections,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub public_key: String,
    pub status: NodeStatus,
    pub metadata: NodeMetadata,
    pub capabilities: NodeCapabilities,
}

impl Node {
    pub fn new(settings: &NodeSettings, signing: &SigningContext, mode: RuntimeMode) -> Self {
        let id = settings
            .id
            .as_deref()
            .and_then(|raw| Uuid::parse_str(raw).ok())
            .map(NodeId)
            .unwrap_or_else(NodeId::generate);
        let now = Utc::now();
        Self {
            id,
            public_key: public_key_display(&signing.public_key()),
            status: NodeStatus::Starting,
            metadata: NodeMetadata {
                name: settings.name.clone(),
                region: settings.region.clone(),
                zone: settings.zone.clone(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                started_at: now,
                last_seen: now,
            },
            capabilities: NodeCapabilities::for_mode(mode, 100),
        }
    }

    pub fn update_last_seen(&mut self) {
        self.metadata.last_seen = Utc::now();
    }

    pub fn set_status(&mut self, status: NodeStatus) {
        self.status = status;
        self.update_last_seen();
    }

    pub fn is_active(&self) -> bool {
        matches!(self.status, NodeStatus::Active)
    }

    pub fn can_accept_connections(&self) -> bool {
        matches!(self.status, NodeStatus::Active | NodeStatus::Degraded)
    }

    /// The string form other crates' `PeerId = String` address this node by.
    pub fn peer_id(&self) -> String {
        self.id.to_string()
    }
}

fn public_key_display(key: &PublicKey) -> String {
    key.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_node_id_is_stable_across_display_and_uuid_roundtrip() {
        let id = NodeId::generate();
        let rendered = id.to_string();
        assert_eq!(rendered, Uuid::from(id).to_string());
    }

    #[test]
    fn coordinator_mode_grants_bootstrap_capability() {
        let caps = NodeCapabilities::for_mode(RuntimeMode::Coordinator, 10);
        assert!(caps.bootstrap);
        let caps = NodeCapabilities::for_mode(RuntimeMode::Node, 10);
        assert!(!caps.bootstrap);
    }

    #[test]
    fn new_node_starts_in_starting_status() {
        let signing = SigningContext::generate();
        let node = Node::new(&NodeSettings::default(), &signing, RuntimeMode::Standalone);
        assert_eq!(node.status, NodeStatus::Starting);
        assert!(!node.is_active());
    }
}
