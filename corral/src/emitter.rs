//! Per-node heartbeat emitters
//!
//! Each admitted node gets a cooperative task that stamps the liveness
//! detector on its behalf. The emitter stands in for an agent running on
//! the node; with real per-node processes the stamps would arrive over
//! the network and the emitter goes away.

use crate::liveness::LivenessDetector;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// How long `stop` waits for the task to wind down before aborting it
const STOP_GRACE: Duration = Duration::from_secs(1);

/// Handle to a running heartbeat emitter
pub struct EmitterHandle {
    node_id: String,
    stop_tx: watch::Sender<bool>,
    paused: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl EmitterHandle {
    /// Suspend stamping without tearing the task down. Simulates a node
    /// going silent; used by failure-injection tests.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    /// Resume stamping after a pause
    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    /// Signal the emitter to stop and join it with a bounded wait
    pub async fn stop(mut self) {
        let _ = self.stop_tx.send(true);
        if tokio::time::timeout(STOP_GRACE, &mut self.task)
            .await
            .is_err()
        {
            warn!(
                "Heartbeat emitter for {} did not stop in {:?}; aborting",
                self.node_id, STOP_GRACE
            );
            self.task.abort();
        }
    }
}

/// Spawn an emitter that stamps `liveness` for `node_id` every interval
pub fn spawn_emitter(
    node_id: &str,
    liveness: Arc<LivenessDetector>,
    interval: Duration,
) -> EmitterHandle {
    let (stop_tx, mut stop_rx) = watch::channel(false);
    let paused = Arc::new(AtomicBool::new(false));

    let task = {
        let node_id = node_id.to_string();
        let paused = Arc::clone(&paused);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => {
                        if !paused.load(Ordering::SeqCst) {
                            liveness.receive_heartbeat(&node_id);
                        }
                    }
                }
            }
            debug!("Heartbeat emitter for {} stopped", node_id);
        })
    };

    EmitterHandle {
        node_id: node_id.to_string(),
        stop_tx,
        paused,
        task,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::liveness::Health;

    fn make_liveness() -> Arc<LivenessDetector> {
        Arc::new(LivenessDetector::new(
            Duration::from_secs(10),
            Duration::from_secs(5),
            Arc::new(SystemClock),
        ))
    }

    #[tokio::test]
    async fn test_emitter_stamps_on_first_tick() {
        let liveness = make_liveness();
        let handle = spawn_emitter("node-1", liveness.clone(), Duration::from_millis(10));

        // The first interval tick fires immediately once the task runs
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(liveness.classify("node-1"), Health::Healthy);

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_paused_emitter_stops_stamping() {
        let liveness = make_liveness();
        let handle = spawn_emitter("node-1", liveness.clone(), Duration::from_millis(10));

        handle.pause();
        tokio::time::sleep(Duration::from_millis(30)).await;
        liveness.forget("node-1");
        tokio::time::sleep(Duration::from_millis(50)).await;

        // No stamp arrived while paused
        assert_eq!(liveness.classify("node-1"), Health::Unknown);

        handle.resume();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(liveness.classify("node-1"), Health::Healthy);

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_stop_joins_promptly() {
        let liveness = make_liveness();
        let handle = spawn_emitter("node-1", liveness, Duration::from_secs(3600));

        // Even with a huge interval, stop must return within the grace
        // window because the task waits on the signal, not the ticker
        let started = std::time::Instant::now();
        handle.stop().await;
        assert!(started.elapsed() < STOP_GRACE);
    }
}
