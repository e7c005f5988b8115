//! fleet-controller — the fleet orchestrator.
//!
//! Holds the authoritative record of every instance (via `fleet-state`),
//! ingests heartbeats pushed by the instances themselves, and runs the
//! periodic reconciliation + scaling tick:
//!
//! 1. startup watchdog (force-retire instances stuck in `Starting`)
//! 2. drift detection against the provisioning backend
//! 3. capacity publication
//! 4. scale-up policy (at most one creation per tick)
//! 5. idle scale-down policy (at most one deletion per tick)
//!
//! Scaling decisions within one tick are computed against a single snapshot;
//! the tick loop never re-enters itself. One instance's failure never blocks
//! reconciliation of the rest of the fleet.

pub mod capacity;
pub mod config;
pub mod controller;
pub mod heartbeat;

pub use capacity::{CapacityGauge, CapacityPublisher};
pub use config::{ControllerConfig, StaticInstance};
pub use controller::FleetController;
pub use heartbeat::Heartbeat;
