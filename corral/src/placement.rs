//! Best-fit pod placement and CPU accounting
//!
//! The engine owns the cluster's resource bookkeeping: per-node CPU
//! rows, the pod-to-node map, preserved CPU requests, and the pending
//! queue for pods that do not fit anywhere yet. A pod id is always in
//! exactly one of the pending queue or the pod-to-node map.
//!
//! All operations serialize on a single engine-wide lock and are O(N) in
//! the number of nodes; clusters are small enough that no secondary
//! index is warranted.

use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{debug, info};

/// Result of a schedule attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// Placed on a node by best fit
    Assigned(String),
    /// The pod was already placed; the existing mapping is returned
    AlreadyAssigned(String),
    /// No node fits; the pod was queued
    Pending,
}

/// A pod detached from a node, carrying its CPU request
///
/// Requests travel with evictions so the repair path never needs to
/// consult the departed node's bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eviction {
    pub pod_id: String,
    pub cpu_request: u32,
}

/// Per-node view used by cluster status reporting
#[derive(Debug, Clone)]
pub struct NodeAllocation {
    pub cpu_capacity: u32,
    pub cpu_available: u32,
    pub pods: Vec<String>,
}

#[derive(Debug)]
struct NodeRow {
    cpu_capacity: u32,
    cpu_available: u32,
    pods: Vec<String>,
}

#[derive(Default)]
struct EngineState {
    nodes: HashMap<String, NodeRow>,
    pod_to_node: HashMap<String, String>,
    pod_to_request: HashMap<String, u32>,
    pending: HashMap<String, u32>,
}

/// CPU accounting and best-fit placement
pub struct PlacementEngine {
    state: Mutex<EngineState>,
    default_pod_cpu: u32,
}

impl PlacementEngine {
    pub fn new(default_pod_cpu: u32) -> Self {
        Self {
            state: Mutex::new(EngineState::default()),
            default_pod_cpu,
        }
    }

    /// Initialize a node's row with full capacity and no pods
    pub fn register_node(&self, node_id: &str, cpu_capacity: u32) -> bool {
        let mut state = self.state.lock();
        if state.nodes.contains_key(node_id) {
            return false;
        }
        state.nodes.insert(
            node_id.to_string(),
            NodeRow {
                cpu_capacity,
                cpu_available: cpu_capacity,
                pods: Vec::new(),
            },
        );
        audit(&state);
        true
    }

    /// Atomically remove a node and detach its pods
    ///
    /// Evicted pods are parked in the pending queue with their CPU
    /// requests preserved, and the same pairs are returned so the caller
    /// can drive rescheduling.
    pub fn unregister_node(&self, node_id: &str) -> Vec<Eviction> {
        let mut state = self.state.lock();
        let evictions = evict_node_locked(&mut state, node_id, self.default_pod_cpu);
        audit(&state);
        evictions
    }

    /// Remove a failing node and immediately try to re-place each of its
    /// pods, all under one lock acquisition
    ///
    /// Used by the repair controller so no placement can interleave
    /// between a node's eviction and the rescheduling of its pods.
    pub fn evict_and_reschedule(&self, node_id: &str) -> Vec<(Eviction, ScheduleOutcome)> {
        let mut state = self.state.lock();
        let evictions = evict_node_locked(&mut state, node_id, self.default_pod_cpu);

        let results = evictions
            .into_iter()
            .map(|eviction| {
                let outcome =
                    schedule_locked(&mut state, &eviction.pod_id, eviction.cpu_request);
                (eviction, outcome)
            })
            .collect();

        audit(&state);
        results
    }

    /// Place a pod by best fit, or queue it
    ///
    /// Idempotent: a pod that is already placed short-circuits with its
    /// current node.
    pub fn schedule(&self, pod_id: &str, cpu_request: u32) -> ScheduleOutcome {
        let mut state = self.state.lock();
        let outcome = schedule_locked(&mut state, pod_id, cpu_request);
        audit(&state);
        outcome
    }

    /// Detach a pod from its node, crediting the CPU back
    ///
    /// The preserved CPU request is kept until the next repair cycle
    /// sweeps records for pods no longer known to the system.
    pub fn unschedule(&self, pod_id: &str) -> bool {
        let mut state = self.state.lock();
        let Some(node_id) = state.pod_to_node.remove(pod_id) else {
            return false;
        };

        let cpu_request = state
            .pod_to_request
            .get(pod_id)
            .copied()
            .unwrap_or(self.default_pod_cpu);
        if let Some(row) = state.nodes.get_mut(&node_id) {
            row.cpu_available += cpu_request;
            row.pods.retain(|p| p != pod_id);
        }

        debug!("Unscheduled pod {} from node {}", pod_id, node_id);
        audit(&state);
        true
    }

    /// Demote an assigned pod back to the pending queue
    ///
    /// Used when a placement must be undone (the chosen node turned out
    /// to be unhealthy) without forgetting the pod.
    pub fn park(&self, pod_id: &str) -> bool {
        let mut state = self.state.lock();
        let Some(node_id) = state.pod_to_node.remove(pod_id) else {
            return false;
        };

        let cpu_request = state
            .pod_to_request
            .remove(pod_id)
            .unwrap_or(self.default_pod_cpu);
        if let Some(row) = state.nodes.get_mut(&node_id) {
            row.cpu_available += cpu_request;
            row.pods.retain(|p| p != pod_id);
        }
        state.pending.insert(pod_id.to_string(), cpu_request);

        info!("Parked pod {} off node {} back to pending", pod_id, node_id);
        audit(&state);
        true
    }

    /// Try to place every pending pod; pods that still do not fit stay
    /// queued
    pub fn drain_pending(&self) -> Vec<(String, ScheduleOutcome)> {
        let snapshot = {
            let state = self.state.lock();
            let mut pods: Vec<(String, u32)> = state
                .pending
                .iter()
                .map(|(id, req)| (id.clone(), *req))
                .collect();
            pods.sort();
            pods
        };

        snapshot
            .into_iter()
            .map(|(pod_id, cpu_request)| {
                let outcome = self.schedule(&pod_id, cpu_request);
                if let ScheduleOutcome::Assigned(ref node) = outcome {
                    info!("Drained pending pod {} onto node {}", pod_id, node);
                }
                (pod_id, outcome)
            })
            .collect()
    }

    /// CPU request recorded for a pod
    ///
    /// Falls back to the configured default only when a repair path is
    /// fed a pod whose accounting record was already lost.
    pub fn cpu_request_of(&self, pod_id: &str) -> u32 {
        let state = self.state.lock();
        state
            .pod_to_request
            .get(pod_id)
            .or_else(|| state.pending.get(pod_id))
            .copied()
            .unwrap_or(self.default_pod_cpu)
    }

    /// Node the pod is currently assigned to, if any
    pub fn assignment_of(&self, pod_id: &str) -> Option<String> {
        self.state.lock().pod_to_node.get(pod_id).cloned()
    }

    /// Ids of all nodes the engine currently accounts for
    pub fn node_ids(&self) -> Vec<String> {
        self.state.lock().nodes.keys().cloned().collect()
    }

    /// Per-node capacity/availability/pod view
    pub fn node_allocations(&self) -> HashMap<String, NodeAllocation> {
        self.state
            .lock()
            .nodes
            .iter()
            .map(|(id, row)| {
                (
                    id.clone(),
                    NodeAllocation {
                        cpu_capacity: row.cpu_capacity,
                        cpu_available: row.cpu_available,
                        pods: row.pods.clone(),
                    },
                )
            })
            .collect()
    }

    /// Snapshot of the pending queue
    pub fn pending_snapshot(&self) -> HashMap<String, u32> {
        self.state.lock().pending.clone()
    }

    /// Drop preserved CPU requests for pods that are neither assigned
    /// nor pending. Called at the end of a repair cycle.
    pub fn sweep_orphaned_requests(&self) {
        let mut state = self.state.lock();
        let EngineState {
            pod_to_node,
            pending,
            pod_to_request,
            ..
        } = &mut *state;
        pod_to_request.retain(|pod, _| pod_to_node.contains_key(pod) || pending.contains_key(pod));
    }
}

fn schedule_locked(state: &mut EngineState, pod_id: &str, cpu_request: u32) -> ScheduleOutcome {
    if let Some(node_id) = state.pod_to_node.get(pod_id) {
        debug!("Pod {} already scheduled on node {}", pod_id, node_id);
        return ScheduleOutcome::AlreadyAssigned(node_id.clone());
    }

    // Best fit: minimal leftover CPU, ties broken by node id
    let mut best: Option<(u32, &str)> = None;
    for (node_id, row) in &state.nodes {
        if row.cpu_available < cpu_request {
            continue;
        }
        let candidate = (row.cpu_available - cpu_request, node_id.as_str());
        if best.map_or(true, |b| candidate < b) {
            best = Some(candidate);
        }
    }

    match best.map(|(_, id)| id.to_string()) {
        Some(node_id) => {
            let row = state.nodes.get_mut(&node_id).expect("best-fit node row");
            row.cpu_available -= cpu_request;
            row.pods.push(pod_id.to_string());
            state.pod_to_node.insert(pod_id.to_string(), node_id.clone());
            state.pod_to_request.insert(pod_id.to_string(), cpu_request);
            state.pending.remove(pod_id);

            info!(
                "Scheduled pod {} on node {} ({} CPU left)",
                pod_id,
                node_id,
                state.nodes[&node_id].cpu_available
            );
            ScheduleOutcome::Assigned(node_id)
        }
        None => {
            state.pending.insert(pod_id.to_string(), cpu_request);
            info!(
                "No node fits pod {} ({} CPU); queued pending",
                pod_id, cpu_request
            );
            ScheduleOutcome::Pending
        }
    }
}

fn evict_node_locked(
    state: &mut EngineState,
    node_id: &str,
    default_pod_cpu: u32,
) -> Vec<Eviction> {
    let Some(row) = state.nodes.remove(node_id) else {
        return Vec::new();
    };

    let mut evictions = Vec::with_capacity(row.pods.len());
    for pod_id in row.pods {
        state.pod_to_node.remove(&pod_id);
        let cpu_request = state
            .pod_to_request
            .remove(&pod_id)
            .unwrap_or(default_pod_cpu);
        state.pending.insert(pod_id.clone(), cpu_request);
        evictions.push(Eviction {
            pod_id,
            cpu_request,
        });
    }

    if !evictions.is_empty() {
        info!(
            "Unregistered node {} and detached {} pods",
            node_id,
            evictions.len()
        );
    }
    evictions
}

/// Accounting invariants, checked after every mutation in debug builds.
/// Violations are programmer errors and fail fast.
#[cfg(debug_assertions)]
fn audit(state: &EngineState) {
    use std::collections::HashSet;

    let mut seen: HashSet<&str> = HashSet::new();
    for (node_id, row) in &state.nodes {
        let mut used = 0u32;
        for pod in &row.pods {
            assert!(
                seen.insert(pod),
                "pod {} appears in more than one node's pod set",
                pod
            );
            assert_eq!(
                state.pod_to_node.get(pod),
                Some(node_id),
                "pod {} on node {} has a mismatched assignment entry",
                pod,
                node_id
            );
            used += state
                .pod_to_request
                .get(pod)
                .copied()
                .unwrap_or_default();
        }
        assert!(
            row.cpu_available <= row.cpu_capacity,
            "node {} has more CPU available than its capacity",
            node_id
        );
        assert_eq!(
            row.cpu_available + used,
            row.cpu_capacity,
            "node {} CPU accounting does not balance",
            node_id
        );
    }

    for (pod, node) in &state.pod_to_node {
        assert!(
            state.nodes.contains_key(node),
            "pod {} assigned to unregistered node {}",
            pod,
            node
        );
        assert!(
            !state.pending.contains_key(pod),
            "pod {} is both assigned and pending",
            pod
        );
    }
}

#[cfg(not(debug_assertions))]
fn audit(_state: &EngineState) {}
