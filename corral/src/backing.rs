//! Backing resources for admitted nodes
//!
//! Every node is backed by an opaque resource handle. In simulated mode
//! the handle is synthesized in-process; an external provider (a real
//! container runtime) plugs in behind [`BackingProvider`]. The registry
//! decides between degrading to a simulated handle and rejecting the
//! node when a provider call fails.

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

/// Opaque identifier for the resource backing a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackingHandle {
    id: String,
    simulated: bool,
}

impl BackingHandle {
    /// Synthesize a simulated handle for a node
    pub fn simulated(node_id: &str) -> Self {
        let suffix = uuid::Uuid::new_v4().to_string()[..8].to_string();
        Self {
            id: format!("sim-{}-{}", node_id, suffix),
            simulated: true,
        }
    }

    /// Wrap an identifier handed back by an external provider
    pub fn external(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            simulated: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_simulated(&self) -> bool {
        self.simulated
    }
}

/// Provider of node backing resources
///
/// `create` may fail; the registry's error policy decides whether that
/// degrades the node to a simulated handle or rejects the registration.
/// `destroy` failures are logged by callers and never propagated.
#[async_trait]
pub trait BackingProvider: Send + Sync {
    async fn create(&self, node_id: &str) -> Result<BackingHandle>;

    async fn destroy(&self, handle: &BackingHandle) -> Result<()>;
}

/// In-process provider used in simulated mode
///
/// Always succeeds unless the failure knob is set, which lets tests
/// exercise the degrade/reject paths without an external runtime.
#[derive(Debug, Default)]
pub struct SimulatedBacking {
    fail_creates: AtomicBool,
}

impl SimulatedBacking {
    pub fn new() -> Self {
        Self::default()
    }

    /// Force subsequent `create` calls to fail (failure injection)
    pub fn set_fail_creates(&self, fail: bool) {
        self.fail_creates.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl BackingProvider for SimulatedBacking {
    async fn create(&self, node_id: &str) -> Result<BackingHandle> {
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(Error::Backing(format!(
                "simulated create failure for node {}",
                node_id
            )));
        }
        Ok(BackingHandle::simulated(node_id))
    }

    async fn destroy(&self, _handle: &BackingHandle) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_simulated_handle_shape() {
        let provider = SimulatedBacking::new();
        let handle = provider.create("node-1").await.unwrap();

        assert!(handle.is_simulated());
        assert!(handle.id().starts_with("sim-node-1-"));
    }

    #[tokio::test]
    async fn test_handles_are_unique_per_create() {
        let provider = SimulatedBacking::new();
        let a = provider.create("node-1").await.unwrap();
        let b = provider.create("node-1").await.unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let provider = SimulatedBacking::new();
        provider.set_fail_creates(true);
        assert!(provider.create("node-1").await.is_err());

        provider.set_fail_creates(false);
        assert!(provider.create("node-1").await.is_ok());
    }

    #[test]
    fn test_external_handle() {
        let handle = BackingHandle::external("abc123");
        assert!(!handle.is_simulated());
        assert_eq!(handle.id(), "abc123");
    }
}
