//! Heartbeat-based liveness detection
//!
//! Tracks the most recent heartbeat per node and classifies each node as
//! Healthy, Unhealthy, or Unknown against a timeout window:
//!
//! ```text
//! not in map                      -> Unknown
//! now - last_heartbeat <= timeout -> Healthy
//! otherwise                       -> Unhealthy
//! ```
//!
//! The detector is a pure predicate: it never takes action on failures.
//! The repair controller reads snapshots on its own cadence, and the
//! probe loop here only logs transitions for operators.

use crate::clock::Clock;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Health classification of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Health {
    Healthy,
    Unhealthy,
    Unknown,
}

impl Health {
    /// Get the classification as a string for log labeling
    pub fn as_str(&self) -> &'static str {
        match self {
            Health::Healthy => "Healthy",
            Health::Unhealthy => "Unhealthy",
            Health::Unknown => "Unknown",
        }
    }
}

/// Heartbeat receiver and health classifier
pub struct LivenessDetector {
    last_seen: Mutex<HashMap<String, Instant>>,
    heartbeat_timeout: Duration,
    probe_interval: Duration,
    clock: Arc<dyn Clock>,
}

impl LivenessDetector {
    pub fn new(
        heartbeat_timeout: Duration,
        probe_interval: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            last_seen: Mutex::new(HashMap::new()),
            heartbeat_timeout,
            probe_interval,
            clock,
        }
    }

    /// Stamp a heartbeat for a node
    ///
    /// Heartbeats for unknown nodes are accepted: an Unknown node becomes
    /// Healthy on its first stamp. Callers own deregistration cleanup.
    pub fn receive_heartbeat(&self, node_id: &str) {
        let now = self.clock.now();
        self.last_seen.lock().insert(node_id.to_string(), now);
    }

    /// Drop the liveness record for a node
    pub fn forget(&self, node_id: &str) {
        if self.last_seen.lock().remove(node_id).is_some() {
            debug!("Forgot liveness record for node {}", node_id);
        }
    }

    /// Classify a single node at the current instant
    pub fn classify(&self, node_id: &str) -> Health {
        let now = self.clock.now();
        match self.last_seen.lock().get(node_id) {
            None => Health::Unknown,
            Some(last) => Self::classify_at(now, *last, self.heartbeat_timeout),
        }
    }

    /// Classify every known node against a single `now()` reading
    pub fn snapshot(&self) -> HashMap<String, Health> {
        let now = self.clock.now();
        self.last_seen
            .lock()
            .iter()
            .map(|(id, last)| {
                (
                    id.clone(),
                    Self::classify_at(now, *last, self.heartbeat_timeout),
                )
            })
            .collect()
    }

    fn classify_at(now: Instant, last: Instant, timeout: Duration) -> Health {
        if now.saturating_duration_since(last) <= timeout {
            Health::Healthy
        } else {
            Health::Unhealthy
        }
    }

    /// Spawn the probe loop: every probe interval, log nodes that
    /// changed classification. Exits on the shutdown signal.
    pub fn spawn_probe_loop(
        self: &Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let detector = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(detector.probe_interval);
            let mut previous: HashMap<String, Health> = HashMap::new();

            info!(
                "Liveness probe started (interval {:?}, timeout {:?})",
                detector.probe_interval, detector.heartbeat_timeout
            );

            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => {
                        let current = detector.snapshot();
                        for (node_id, health) in &current {
                            match previous.get(node_id) {
                                Some(prev) if prev == health => {}
                                Some(_) if *health == Health::Unhealthy => {
                                    warn!("Node {} missed its heartbeat window", node_id);
                                }
                                Some(_) => {
                                    info!("Node {} is {} again", node_id, health.as_str());
                                }
                                None => {
                                    debug!("Node {} observed as {}", node_id, health.as_str());
                                }
                            }
                        }
                        previous = current;
                    }
                }
            }

            info!("Liveness probe stopped");
        })
    }
}
