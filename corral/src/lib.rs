//! Corral - a miniature cluster-orchestration control plane
//!
//! Corral simulates the control plane of a container scheduler: nodes are
//! admitted with a CPU capacity, pods are placed on nodes by a best-fit
//! policy, per-node heartbeat emitters feed a liveness detector, and a
//! repair loop evicts pods off failed or removed nodes and reschedules
//! them onto survivors.
//!
//! # Architecture
//!
//! - **Registry**: admission source of truth for nodes and their backing
//!   resources (simulated or external)
//! - **Liveness**: heartbeat timestamps and the Healthy/Unhealthy/Unknown
//!   classification, a pure predicate with no repair side effects
//! - **Placement**: CPU accounting, best-fit selection, and the pending
//!   queue for pods that do not fit anywhere yet
//! - **Repair**: periodic reconciliation that drains failed nodes and
//!   reschedules their pods, publishing a one-shot report
//! - **Emitter**: one cooperative heartbeat task per admitted node
//! - **Control**: the facade sequencing the components behind AddNode,
//!   RemoveNode, SchedulePod, and GetStatus
//!
//! Components never hold references to each other; the repair controller
//! and the facade compose them from above, and a pod's CPU request
//! travels with it through every eviction path.

pub mod backing;
pub mod clock;
pub mod config;
pub mod control;
pub mod emitter;
pub mod error;
pub mod liveness;
pub mod placement;
pub mod registry;
pub mod repair;

pub use backing::{BackingHandle, BackingProvider, SimulatedBacking};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BackingConfig, BackingErrorPolicy, BackingMode, CorralConfig, ServerConfig};
pub use control::{ControlPlane, NodeStatus, PodPlacement};
pub use error::{Error, Result};
pub use liveness::{Health, LivenessDetector};
pub use placement::{Eviction, NodeAllocation, PlacementEngine, ScheduleOutcome};
pub use registry::{NodeRecord, NodeRegistry, Registration};
pub use repair::{RepairController, RescheduleStatus, Rescheduled};
