//! Cluster repair loop
//!
//! Periodically reconciles the placement engine against liveness and
//! admission: nodes that stopped heartbeating or were removed from the
//! registry are drained, their pods rescheduled onto survivors, and the
//! pending queue given a chance to drain. Outcomes are published into a
//! one-shot report that external callers consume once.
//!
//! Rescheduling is idempotent: a pod some other path already placed
//! short-circuits as already rescheduled, and a pod that does not fit
//! stays pending and is retried every cycle.

use crate::liveness::{Health, LivenessDetector};
use crate::placement::{Eviction, PlacementEngine, ScheduleOutcome};
use crate::registry::NodeRegistry;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Outcome of one pod's eviction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RescheduleStatus {
    /// Placed on a new node this cycle
    Rescheduled,
    /// No surviving node fits; the pod stays pending
    Failed,
    /// Another path had already re-placed the pod
    AlreadyRescheduled,
}

/// One entry of the rescheduled-pods report
#[derive(Debug, Clone, Serialize)]
pub struct Rescheduled {
    pub old_node: String,
    pub new_node: Option<String>,
    pub status: RescheduleStatus,
}

/// Reconciliation driver composing registry, liveness, and placement
pub struct RepairController {
    registry: Arc<NodeRegistry>,
    liveness: Arc<LivenessDetector>,
    placement: Arc<PlacementEngine>,
    report: Mutex<HashMap<String, Rescheduled>>,
    interval: Duration,
}

impl RepairController {
    pub fn new(
        registry: Arc<NodeRegistry>,
        liveness: Arc<LivenessDetector>,
        placement: Arc<PlacementEngine>,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            liveness,
            placement,
            report: Mutex::new(HashMap::new()),
            interval,
        }
    }

    /// Run one reconciliation cycle, returning the entries it produced
    pub fn run_once(&self) -> HashMap<String, Rescheduled> {
        let health = self.liveness.snapshot();

        // A node is failing when the engine still accounts for it but it
        // has stopped heartbeating or was removed from the registry.
        let failing: Vec<String> = self
            .placement
            .node_ids()
            .into_iter()
            .filter(|node_id| {
                !self.registry.exists(node_id)
                    || health.get(node_id) == Some(&Health::Unhealthy)
            })
            .collect();

        let mut produced = HashMap::new();
        for node_id in failing {
            warn!("Node {} is failing; draining its pods", node_id);
            let results = self.placement.evict_and_reschedule(&node_id);
            for (eviction, outcome) in results {
                produced.insert(eviction.pod_id.clone(), entry_for(&node_id, &outcome));
            }
        }

        self.finish_cycle(produced)
    }

    /// Synchronous repair path for pods already detached by node removal
    pub fn reschedule_evicted(
        &self,
        old_node: &str,
        evictions: Vec<Eviction>,
    ) -> HashMap<String, Rescheduled> {
        let mut produced = HashMap::new();
        for eviction in evictions {
            let outcome = self
                .placement
                .schedule(&eviction.pod_id, eviction.cpu_request);
            produced.insert(eviction.pod_id, entry_for(old_node, &outcome));
        }

        self.finish_cycle(produced)
    }

    /// Shared cycle tail: drain the pending queue, upgrade entries the
    /// drain managed to place, sweep dead accounting records, publish.
    fn finish_cycle(
        &self,
        mut produced: HashMap<String, Rescheduled>,
    ) -> HashMap<String, Rescheduled> {
        self.placement.drain_pending();

        for (pod_id, entry) in produced.iter_mut() {
            if entry.status == RescheduleStatus::Failed {
                if let Some(node) = self.placement.assignment_of(pod_id) {
                    entry.new_node = Some(node);
                    entry.status = RescheduleStatus::Rescheduled;
                }
            }
        }

        self.placement.sweep_orphaned_requests();

        if !produced.is_empty() {
            let moved = produced
                .values()
                .filter(|e| e.status == RescheduleStatus::Rescheduled)
                .count();
            info!(
                "Repair cycle rescheduled {}/{} evicted pods",
                moved,
                produced.len()
            );
            self.report.lock().extend(
                produced
                    .iter()
                    .map(|(pod, entry)| (pod.clone(), entry.clone())),
            );
        }

        produced
    }

    /// Drain the one-shot report
    pub fn take_report(&self) -> HashMap<String, Rescheduled> {
        std::mem::take(&mut *self.report.lock())
    }

    /// Spawn the periodic reconciliation loop; exits on the shutdown
    /// signal. Errors never escape the task.
    pub fn spawn_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            info!("Repair controller started (interval {:?})", self.interval);

            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => {
                        self.run_once();
                    }
                }
            }

            info!("Repair controller stopped");
        })
    }
}

fn entry_for(old_node: &str, outcome: &ScheduleOutcome) -> Rescheduled {
    match outcome {
        ScheduleOutcome::Assigned(node) => Rescheduled {
            old_node: old_node.to_string(),
            new_node: Some(node.clone()),
            status: RescheduleStatus::Rescheduled,
        },
        ScheduleOutcome::AlreadyAssigned(node) => Rescheduled {
            old_node: old_node.to_string(),
            new_node: Some(node.clone()),
            status: RescheduleStatus::AlreadyRescheduled,
        },
        ScheduleOutcome::Pending => Rescheduled {
            old_node: old_node.to_string(),
            new_node: None,
            status: RescheduleStatus::Failed,
        },
    }
}
