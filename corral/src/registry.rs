//! Node registry
//!
//! Source of truth for node admission. The placement engine and liveness
//! detector are updated only after the registry confirms a register or
//! deregister, so neither can ever reference a non-admitted node. Node
//! ids are single-use per process lifetime: a removed id is tombstoned
//! and cannot be re-registered.

use crate::backing::{BackingHandle, BackingProvider};
use crate::config::BackingErrorPolicy;
use crate::error::{Error, Result};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};

/// An admitted node
#[derive(Debug, Clone)]
pub struct NodeRecord {
    pub node_id: String,
    pub cpu_capacity: u32,
    pub backing: BackingHandle,
}

/// Outcome of a successful registration
#[derive(Debug, Clone)]
pub struct Registration {
    pub handle: BackingHandle,
    /// True when the provider failed and the node fell back to a
    /// simulated handle under the degrade policy
    pub degraded: bool,
}

#[derive(Default)]
struct RegistryState {
    nodes: HashMap<String, NodeRecord>,
    retired: HashSet<String>,
}

/// Tracks admitted nodes and their backing-resource lifecycle
pub struct NodeRegistry {
    state: RwLock<RegistryState>,
    provider: Arc<dyn BackingProvider>,
    on_error: BackingErrorPolicy,
}

impl NodeRegistry {
    pub fn new(provider: Arc<dyn BackingProvider>, on_error: BackingErrorPolicy) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            provider,
            on_error,
        }
    }

    /// Admit a node, acquiring its backing resource
    ///
    /// A failed registration leaves no record. Duplicate ids and retired
    /// ids are rejected before the provider is consulted.
    pub async fn register(&self, node_id: &str, cpu_capacity: u32) -> Result<Registration> {
        {
            let state = self.state.read();
            if state.nodes.contains_key(node_id) {
                return Err(Error::NodeExists(node_id.to_string()));
            }
            if state.retired.contains(node_id) {
                return Err(Error::NodeRetired(node_id.to_string()));
            }
        }

        let (handle, degraded) = match self.provider.create(node_id).await {
            Ok(handle) => (handle, false),
            Err(e) => match self.on_error {
                BackingErrorPolicy::Degrade => {
                    warn!(
                        "Backing create failed for node {}: {}. Degrading to simulated handle",
                        node_id, e
                    );
                    (BackingHandle::simulated(node_id), true)
                }
                BackingErrorPolicy::Reject => return Err(e),
            },
        };

        // The provider call ran unlocked; a concurrent register may have
        // won the race. The loser releases its freshly created resource.
        let lost_race = {
            let mut state = self.state.write();
            if state.nodes.contains_key(node_id) || state.retired.contains(node_id) {
                true
            } else {
                state.nodes.insert(
                    node_id.to_string(),
                    NodeRecord {
                        node_id: node_id.to_string(),
                        cpu_capacity,
                        backing: handle.clone(),
                    },
                );
                false
            }
        };

        if lost_race {
            if let Err(e) = self.provider.destroy(&handle).await {
                warn!("Failed to release backing for duplicate node {}: {}", node_id, e);
            }
            return Err(Error::NodeExists(node_id.to_string()));
        }

        info!(
            "Registered node {} (capacity {}, backing {})",
            node_id,
            cpu_capacity,
            handle.id()
        );
        Ok(Registration { handle, degraded })
    }

    /// Remove a node and release its backing resource
    ///
    /// The record is removed and the id tombstoned regardless of whether
    /// the backing cleanup succeeds; destroy errors are logged only.
    pub async fn deregister(&self, node_id: &str) -> Result<NodeRecord> {
        let record = {
            let mut state = self.state.write();
            let record = state
                .nodes
                .remove(node_id)
                .ok_or_else(|| Error::NodeNotFound(node_id.to_string()))?;
            state.retired.insert(node_id.to_string());
            record
        };

        if let Err(e) = self.provider.destroy(&record.backing).await {
            warn!(
                "Failed to destroy backing {} for node {}: {}",
                record.backing.id(),
                node_id,
                e
            );
        }

        info!("Deregistered node {}", node_id);
        Ok(record)
    }

    pub fn exists(&self, node_id: &str) -> bool {
        self.state.read().nodes.contains_key(node_id)
    }

    pub fn get(&self, node_id: &str) -> Option<NodeRecord> {
        self.state.read().nodes.get(node_id).cloned()
    }

    /// Snapshot of all admitted nodes
    pub fn list(&self) -> Vec<NodeRecord> {
        self.state.read().nodes.values().cloned().collect()
    }

    pub fn node_count(&self) -> usize {
        self.state.read().nodes.len()
    }
}
