//! The routing table and candidate selection.
//!
//! Traffic must only reach instances the controller believes are healthy:
//! the reconciliation loop and heartbeat ingestion register instances as
//! they come online and unregister them the moment they are not.

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::debug;

use fleet_state::{InstanceRecord, InstanceRole, LifecycleState, NetAddress};

/// Registration interface to the routing layer.
pub trait RoutingTable: Send + Sync {
    /// Register `name` at `address`. No-op when an entry with an identical
    /// address already exists; otherwise the entry is replaced.
    fn register(&self, name: &str, address: &NetAddress);

    /// Remove `name`. No-op if absent.
    fn unregister(&self, name: &str);

    /// Address currently registered for `name`.
    fn lookup(&self, name: &str) -> Option<NetAddress>;

    /// Number of registered instances.
    fn len(&self) -> usize;

    fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-process routing table.
#[derive(Default)]
pub struct InProcessRouting {
    entries: RwLock<HashMap<String, NetAddress>>,
}

impl InProcessRouting {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RoutingTable for InProcessRouting {
    fn register(&self, name: &str, address: &NetAddress) {
        let mut entries = self.entries.write().expect("routing lock");
        match entries.get(name) {
            Some(existing) if existing == address => {} // already registered
            _ => {
                entries.insert(name.to_string(), address.clone());
                debug!(%name, endpoint = %address.endpoint(), "instance registered");
            }
        }
    }

    fn unregister(&self, name: &str) {
        let mut entries = self.entries.write().expect("routing lock");
        if entries.remove(name).is_some() {
            debug!(%name, "instance unregistered");
        }
    }

    fn lookup(&self, name: &str) -> Option<NetAddress> {
        let entries = self.entries.read().expect("routing lock");
        entries.get(name).cloned()
    }

    fn len(&self) -> usize {
        let entries = self.entries.read().expect("routing lock");
        entries.len()
    }
}

/// The reachable Online instance of `role` with the lowest occupancy.
///
/// Used for fallback redirection when a target instance is unavailable.
pub fn best_candidate<'a>(
    records: &'a [InstanceRecord],
    table: &dyn RoutingTable,
    role: InstanceRole,
) -> Option<&'a InstanceRecord> {
    records
        .iter()
        .filter(|r| r.role == role && r.state == LifecycleState::Online && table.contains(&r.name))
        .min_by_key(|r| r.occupancy)
}
