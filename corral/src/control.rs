//! Control-plane facade
//!
//! Aggregates the registry, liveness detector, placement engine, repair
//! controller, and heartbeat emitters behind the four top-level cluster
//! operations. Each operation sequences the components so the global
//! accounting invariants hold on return; no two component locks are ever
//! held at once.

use crate::backing::{BackingProvider, SimulatedBacking};
use crate::clock::{Clock, SystemClock};
use crate::config::{BackingMode, CorralConfig};
use crate::emitter::{spawn_emitter, EmitterHandle};
use crate::error::{Error, Result};
use crate::liveness::{Health, LivenessDetector};
use crate::placement::{PlacementEngine, ScheduleOutcome};
use crate::registry::{NodeRegistry, Registration};
use crate::repair::{RepairController, Rescheduled};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Result of a pod scheduling request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PodPlacement {
    /// Freshly placed on a healthy node
    Scheduled { node: String },
    /// The pod was already placed; the existing mapping is returned
    AlreadyScheduled { node: String },
    /// No node fits; queued for the next drain
    Pending,
    /// Best fit chose a node that was not healthy at the moment of
    /// return; the placement was undone and the pod queued
    RejectedUnhealthy { node: String },
}

/// Per-node row of the cluster status view
#[derive(Debug, Clone, Serialize)]
pub struct NodeStatus {
    pub container_id: String,
    pub cpu_capacity: u32,
    pub cpu_available: u32,
    pub health: Health,
    pub pods: Vec<String>,
}

/// The assembled control plane
///
/// Constructed once at startup and shared behind an `Arc`; request
/// handlers, the repair loop, and the emitters all act through it.
pub struct ControlPlane {
    config: CorralConfig,
    registry: Arc<NodeRegistry>,
    liveness: Arc<LivenessDetector>,
    placement: Arc<PlacementEngine>,
    repair: Arc<RepairController>,
    emitters: Mutex<HashMap<String, EmitterHandle>>,
}

impl ControlPlane {
    /// Build a control plane with the production clock and the provider
    /// selected by configuration
    pub fn new(config: CorralConfig) -> Self {
        if config.backing.mode == BackingMode::External {
            warn!("No external backing provider wired; using the simulated provider");
        }
        Self::with_components(config, Arc::new(SystemClock), Arc::new(SimulatedBacking::new()))
    }

    /// Build a control plane from explicit parts
    ///
    /// Tests inject a manual clock here; embedders wire a real backing
    /// provider.
    pub fn with_components(
        config: CorralConfig,
        clock: Arc<dyn Clock>,
        provider: Arc<dyn BackingProvider>,
    ) -> Self {
        let registry = Arc::new(NodeRegistry::new(provider, config.backing.on_error));
        let liveness = Arc::new(LivenessDetector::new(
            config.heartbeat_timeout(),
            config.probe_interval(),
            clock,
        ));
        let placement = Arc::new(PlacementEngine::new(config.default_pod_cpu));
        let repair = Arc::new(RepairController::new(
            registry.clone(),
            liveness.clone(),
            placement.clone(),
            config.repair_interval(),
        ));

        Self {
            config,
            registry,
            liveness,
            placement,
            repair,
            emitters: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &CorralConfig {
        &self.config
    }

    /// Admit a node: registry first, then placement, emitter, a priming
    /// heartbeat, and a pending-queue drain (the new capacity may
    /// unblock queued pods)
    pub async fn add_node(&self, node_id: &str, cpu_capacity: u32) -> Result<Registration> {
        if node_id.is_empty() {
            return Err(Error::InvalidInput("node_id is required".to_string()));
        }
        if cpu_capacity == 0 {
            return Err(Error::InvalidInput(
                "cpu_capacity must be positive".to_string(),
            ));
        }

        let registration = self.registry.register(node_id, cpu_capacity).await?;
        self.placement.register_node(node_id, cpu_capacity);

        let handle = spawn_emitter(node_id, self.liveness.clone(), self.config.emit_interval());
        self.emitters.lock().insert(node_id.to_string(), handle);
        self.liveness.receive_heartbeat(node_id);

        let drained = self.placement.drain_pending();
        let placed = drained
            .iter()
            .filter(|(_, o)| matches!(o, ScheduleOutcome::Assigned(_)))
            .count();
        if placed > 0 {
            info!("Adding node {} unblocked {} pending pods", node_id, placed);
        }

        Ok(registration)
    }

    /// Remove a node and immediately reschedule whatever ran on it
    pub async fn remove_node(&self, node_id: &str) -> Result<()> {
        if !self.registry.exists(node_id) {
            return Err(Error::NodeNotFound(node_id.to_string()));
        }

        let handle = self.emitters.lock().remove(node_id);
        if let Some(handle) = handle {
            handle.stop().await;
        }

        self.liveness.forget(node_id);
        let evicted = self.placement.unregister_node(node_id);
        self.registry.deregister(node_id).await?;

        // Synchronous repair step so callers observe rescheduling at once
        self.repair.reschedule_evicted(node_id, evicted);
        Ok(())
    }

    /// Place a pod, reconciling stale assignments and refusing nodes
    /// that are not healthy at the moment of return
    pub async fn schedule_pod(&self, pod_id: &str, cpu_request: u32) -> Result<PodPlacement> {
        if pod_id.is_empty() {
            return Err(Error::InvalidInput("pod_id is required".to_string()));
        }
        if cpu_request == 0 {
            return Err(Error::InvalidInput(
                "cpu_request must be positive".to_string(),
            ));
        }

        // A pod still mapped to a node that left the registry is stale
        // state from a lost race; detach it before placing again.
        if let Some(node_id) = self.placement.assignment_of(pod_id) {
            if !self.registry.exists(&node_id) {
                info!(
                    "Pod {} was assigned to departed node {}; unscheduling",
                    pod_id, node_id
                );
                self.placement.unschedule(pod_id);
            }
        }

        match self.placement.schedule(pod_id, cpu_request) {
            ScheduleOutcome::Assigned(node) => {
                // The node may have turned unhealthy between the liveness
                // read and the placement; undo rather than hand out a
                // placement on a failing node.
                if self.liveness.classify(&node) != Health::Healthy {
                    warn!(
                        "Node {} is not healthy; undoing placement of pod {}",
                        node, pod_id
                    );
                    self.placement.park(pod_id);
                    return Ok(PodPlacement::RejectedUnhealthy { node });
                }
                Ok(PodPlacement::Scheduled { node })
            }
            ScheduleOutcome::AlreadyAssigned(node) => Ok(PodPlacement::AlreadyScheduled { node }),
            ScheduleOutcome::Pending => Ok(PodPlacement::Pending),
        }
    }

    /// Joined view of registry, liveness, and placement, keyed by node
    pub fn status(&self) -> HashMap<String, NodeStatus> {
        let health = self.liveness.snapshot();
        let allocations = self.placement.node_allocations();

        self.registry
            .list()
            .into_iter()
            .map(|record| {
                let allocation = allocations.get(&record.node_id);
                let status = NodeStatus {
                    container_id: record.backing.id().to_string(),
                    cpu_capacity: record.cpu_capacity,
                    cpu_available: allocation.map(|a| a.cpu_available).unwrap_or(0),
                    health: health
                        .get(&record.node_id)
                        .copied()
                        .unwrap_or(Health::Unknown),
                    pods: allocation.map(|a| a.pods.clone()).unwrap_or_default(),
                };
                (record.node_id, status)
            })
            .collect()
    }

    /// Pods admitted but not yet placed, with their CPU requests
    pub fn pending_pods(&self) -> HashMap<String, u32> {
        self.placement.pending_snapshot()
    }

    /// Drain the one-shot rescheduled-pods report
    pub fn take_rescheduled(&self) -> HashMap<String, Rescheduled> {
        self.repair.take_report()
    }

    /// Inject a heartbeat on behalf of a node
    ///
    /// This is the path network-received heartbeats would take when real
    /// per-node agents exist; tests use it to keep chosen nodes fresh.
    pub fn heartbeat(&self, node_id: &str) {
        self.liveness.receive_heartbeat(node_id);
    }

    /// Run one synchronous repair cycle
    pub fn run_repair_cycle(&self) -> HashMap<String, Rescheduled> {
        self.repair.run_once()
    }

    /// Suspend a node's heartbeat emitter (failure injection)
    pub fn pause_heartbeats(&self, node_id: &str) -> bool {
        match self.emitters.lock().get(node_id) {
            Some(handle) => {
                handle.pause();
                true
            }
            None => false,
        }
    }

    /// Resume a paused heartbeat emitter
    pub fn resume_heartbeats(&self, node_id: &str) -> bool {
        match self.emitters.lock().get(node_id) {
            Some(handle) => {
                handle.resume();
                true
            }
            None => false,
        }
    }

    /// Spawn the repair loop and the liveness probe loop
    pub fn spawn_background_tasks(
        self: &Arc<Self>,
        shutdown: watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>> {
        vec![
            self.repair.clone().spawn_loop(shutdown.clone()),
            self.liveness.spawn_probe_loop(shutdown),
        ]
    }

    /// Stop every heartbeat emitter; called on process shutdown
    pub async fn shutdown(&self) {
        let handles: Vec<EmitterHandle> = {
            let mut emitters = self.emitters.lock();
            emitters.drain().map(|(_, handle)| handle).collect()
        };
        for handle in handles {
            handle.stop().await;
        }
        info!("Control plane shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::time::Duration;

    fn make_control() -> (Arc<ControlPlane>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let control = Arc::new(ControlPlane::with_components(
            CorralConfig::default(),
            clock.clone(),
            Arc::new(SimulatedBacking::new()),
        ));
        (control, clock)
    }

    #[tokio::test]
    async fn test_add_node_validations() {
        let (control, _) = make_control();

        assert!(matches!(
            control.add_node("", 100).await.unwrap_err(),
            Error::InvalidInput(_)
        ));
        assert!(matches!(
            control.add_node("node-1", 0).await.unwrap_err(),
            Error::InvalidInput(_)
        ));

        // Failed validation left no trace
        assert!(control.status().is_empty());
    }

    #[tokio::test]
    async fn test_add_node_primes_liveness() {
        let (control, _) = make_control();
        control.add_node("node-1", 100).await.unwrap();

        let status = control.status();
        assert_eq!(status["node-1"].health, Health::Healthy);
        assert_eq!(status["node-1"].cpu_available, 100);
        assert!(status["node-1"].container_id.starts_with("sim-node-1-"));
    }

    #[tokio::test]
    async fn test_schedule_pod_validations() {
        let (control, _) = make_control();
        assert!(control.schedule_pod("", 10).await.is_err());
        assert!(control.schedule_pod("pod-1", 0).await.is_err());
    }

    #[tokio::test]
    async fn test_schedule_rejects_unhealthy_choice() {
        let (control, clock) = make_control();
        control.add_node("node-1", 100).await.unwrap();
        control.pause_heartbeats("node-1");

        clock.advance(Duration::from_secs(11));

        let placement = control.schedule_pod("pod-1", 10).await.unwrap();
        assert_eq!(
            placement,
            PodPlacement::RejectedUnhealthy {
                node: "node-1".to_string()
            }
        );

        // The pod stays queued, not placed
        assert_eq!(control.pending_pods().get("pod-1"), Some(&10));
        let status = control.status();
        assert!(status["node-1"].pods.is_empty());
        assert_eq!(status["node-1"].cpu_available, 100);
    }

    #[tokio::test]
    async fn test_remove_node_unknown() {
        let (control, _) = make_control();
        assert!(matches!(
            control.remove_node("ghost").await.unwrap_err(),
            Error::NodeNotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_stale_assignment_is_reconciled() {
        let (control, _) = make_control();
        control.add_node("node-1", 100).await.unwrap();
        control.add_node("node-2", 100).await.unwrap();

        let placed = control.schedule_pod("pod-1", 30).await.unwrap();
        assert_eq!(
            placed,
            PodPlacement::Scheduled {
                node: "node-1".to_string()
            }
        );

        control.remove_node("node-1").await.unwrap();

        // The synchronous repair step already moved the pod; scheduling
        // again reports the existing mapping instead of double-placing
        let placed = control.schedule_pod("pod-1", 30).await.unwrap();
        assert_eq!(
            placed,
            PodPlacement::AlreadyScheduled {
                node: "node-2".to_string()
            }
        );
    }
}
