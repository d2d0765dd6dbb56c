//! Deterministic projection of the committed log (component C3).
//!
//! No network I/O happens here — the engine feeds committed
//! [`Command`]s in and everything else only reads. Every mutation builds a
//! new immutable snapshot and atomically swaps the pointer, so readers never
//! block behind a writer and never observe a partially-applied command.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::types::{Command, LogIndex};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeView {
    pub node_id: String,
    pub capabilities: Value,
    pub capacity: Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlacementView {
    pub model_id: String,
    pub node_id: String,
    pub partition_index: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterStateSnapshot {
    pub applied_index: LogIndex,
    pub nodes: HashMap<String, NodeView>,
    pub placements: Vec<PlacementView>,
    pub policies: HashMap<String, Value>,
}

impl ClusterStateSnapshot {
    fn apply(&self, command: &Command, index: LogIndex) -> Self {
        let mut next = self.clone();
        next.applied_index = index;
        match command {
            Command::JoinNode {
                node_id,
                capabilities,
            } => {
                next.nodes.insert(
                    node_id.clone(),
                    NodeView {
                        node_id: node_id.clone(),
                        capabilities: capabilities.clone(),
                        capacity: Value::Null,
                    },
                );
            }
            Command::LeaveNode { node_id } => {
                next.nodes.remove(node_id);
                next.placements.retain(|p| &p.node_id != node_id);
            }
            Command::UpdateCapacity { node_id, capacity } => {
                if let Some(node) = next.nodes.get_mut(node_id) {
                    node.capacity = capacity.clone();
                }
            }
            Command::PlaceModel {
                model_id,
                node_id,
                partition_index,
            } => {
                next.placements.push(PlacementView {
                    model_id: model_id.clone(),
                    node_id: node_id.clone(),
                    partition_index: *partition_index,
                });
            }
            Command::EvictModel { model_id, node_id } => {
                next.placements
                    .retain(|p| !(&p.model_id == model_id && &p.node_id == node_id));
            }
            Command::UpdatePolicy { key, value } => {
                next.policies.insert(key.clone(), value.clone());
            }
        }
        next
    }
}

pub struct ClusterStateStore {
    current: RwLock<Arc<ClusterStateSnapshot>>,
    changes: broadcast::Sender<Arc<ClusterStateSnapshot>>,
}

impl ClusterStateStore {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self {
            current: RwLock::new(Arc::new(ClusterStateSnapshot::default())),
            changes: tx,
        }
    }

    /// Copy-on-write apply: builds the next snapshot off the current one and
    /// swaps the pointer under a momentary write lock.
    pub fn apply(&self, command: &Command, index: LogIndex) -> Arc<ClusterStateSnapshot> {
        let next = {
            let guard = self.current.read().expect("cluster state lock poisoned");
            Arc::new(guard.apply(command, index))
        };
        *self.current.write().expect("cluster state lock poisoned") = Arc::clone(&next);
        let _ = self.changes.send(Arc::clone(&next));
        next
    }

    pub fn snapshot(&self) -> Arc<ClusterStateSnapshot> {
        Arc::clone(&self.current.read().expect("cluster state lock poisoned"))
    }

    pub fn restore(&self, snapshot: ClusterStateSnapshot) {
        *self.current.write().expect("cluster state lock poisoned") = Arc::new(snapshot);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<ClusterStateSnapshot>> {
        self.changes.subscribe()
    }
}

impl Default for ClusterStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_then_place_is_visible_in_snapshot() {
        let store = ClusterStateStore::new();
        store.apply(
            &Command::JoinNode {
                node_id: "n1".into(),
                capabilities: Value::Null,
            },
            1,
        );
        let snap = store.apply(
            &Command::PlaceModel {
                model_id: "m1".into(),
                node_id: "n1".into(),
                partition_index: 0,
            },
            2,
        );
        assert_eq!(snap.applied_index, 2);
        assert!(snap.nodes.contains_key("n1"));
        assert_eq!(snap.placements.len(), 1);
    }

    #[test]
    fn leave_node_drops_its_placements() {
        let store = ClusterStateStore::new();
        store.apply(
            &Command::JoinNode {
                node_id: "n1".into(),
                capabilities: Value::Null,
            },
            1,
        );
        store.apply(
            &Command::PlaceModel {
                model_id: "m1".into(),
                node_id: "n1".into(),
                partition_index: 0,
            },
            2,
        );
        let snap = store.apply(
            &Command::LeaveNode {
                node_id: "n1".into(),
            },
            3,
        );
        assert!(!snap.nodes.contains_key("n1"));
        assert!(snap.placements.is_empty());
    }

    #[test]
    fn old_snapshot_unaffected_by_later_mutation() {
        let store = ClusterStateStore::new();
        let before = store.snapshot();
        store.apply(
            &Command::JoinNode {
                node_id: "n1".into(),
                capabilities: Value::Null,
            },
            1,
        );
        assert!(before.nodes.is_empty());
    }
}
