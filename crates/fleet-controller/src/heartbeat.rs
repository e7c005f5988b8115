//! Heartbeat messages pushed by running instances.

use serde::{Deserialize, Serialize};

use fleet_state::{LifecycleState, NetAddress};

/// Periodic self-reported status from one instance.
///
/// Heartbeats update existing records only; an unknown `name` is ignored,
/// never turned into a new record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub name: String,
    pub state: LifecycleState,
    #[serde(default)]
    pub status_label: String,
    #[serde(default)]
    pub scene: String,
    #[serde(default)]
    pub shutdown_eligible: bool,
    pub occupancy: u32,
    /// Reported once the instance knows its reachable address.
    #[serde(default)]
    pub address: Option<NetAddress>,
}
