//! Domain types for the fleet store.
//!
//! An [`InstanceRecord`] describes one fleet member. Records are created by
//! the controller when scaling up (state `Starting`, no address yet) or
//! synchronized at boot for statically-configured instances, mutated by
//! heartbeat ingestion and the reconciliation loop, and removed only after
//! the provisioning backend confirms deletion.

use serde::{Deserialize, Serialize};

/// Sentinel used on the wire for records that have no provider id
/// (statically-provisioned instances not managed by the provisioning API).
pub const EXTERNAL_ID_NOT_SET: &str = "NOT_SET";

/// Network address of a reachable instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetAddress {
    pub host: String,
    pub port: u16,
}

impl NetAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// `host:port` string.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Role category of an instance.
///
/// Only `Pool` instances are fungible and subject to auto-scaling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceRole {
    /// Entry point instances players land on first.
    Login,
    /// The scalable general pool.
    Pool,
    /// Long-lived instances with pinned workloads.
    Persistent,
}

/// Lifecycle state of an instance.
///
/// Transitions follow `Offline → Starting → Online → Stopping → (removed)`;
/// any state may fall back to `Offline` when a crash is detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Offline,
    Starting,
    Online,
    Stopping,
}

impl LifecycleState {
    /// Whether moving to `next` is a legal transition.
    pub fn transition_allowed(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (_, Offline) | (Offline, Starting) | (Starting, Online) | (Online, Stopping)
        )
    }
}

/// Occupancy limits for an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capacity {
    /// Normal maximum occupancy.
    pub normal: u32,
    /// Elevated maximum occupancy for privileged users.
    pub elevated: u32,
}

/// One fleet member, keyed by its unique `name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    /// Unique key. Immutable once created.
    pub name: String,
    /// Human label.
    pub display_name: String,
    /// Empty until the instance is reachable.
    pub address: Option<NetAddress>,
    /// Provider-assigned string id. `None` for statically-provisioned
    /// instances; serialized as the `NOT_SET` sentinel. Set at most once,
    /// at creation — a record without it cannot be polled or deleted via
    /// the provisioning API.
    #[serde(with = "external_id_wire")]
    pub external_id: Option<String>,
    /// Provider-internal numeric id used for deletion calls.
    pub internal_id: Option<i64>,
    pub role: InstanceRole,
    /// Statically-provisioned instances are never auto-deleted and are
    /// exempt from idle scale-down and orphan purge.
    pub static_instance: bool,
    pub state: LifecycleState,
    pub capacity: Capacity,
    /// Minimum access tier required to join.
    pub min_tier: u32,
    pub occupancy: u32,
    /// Free-form game-state label reported by the instance.
    pub status_label: String,
    /// Map/scene label reported by the instance.
    pub scene: String,
    /// Set by the instance itself to signal it has no in-progress work.
    pub shutdown_eligible: bool,
    /// Epoch seconds when the record entered `Starting`. Cleared when the
    /// instance comes online; drives the startup watchdog.
    pub started_at: Option<u64>,
    /// Epoch seconds when occupancy was first observed at zero. Cleared by
    /// any nonzero occupancy; drives idle scale-down.
    pub empty_since: Option<u64>,
}

impl InstanceRecord {
    /// A placeholder record for a freshly requested pool instance:
    /// `Starting`, no address, no provider ids yet.
    pub fn placeholder(name: impl Into<String>, role: InstanceRole, now: u64) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            name,
            address: None,
            external_id: None,
            internal_id: None,
            role,
            static_instance: false,
            state: LifecycleState::Starting,
            capacity: Capacity {
                normal: 0,
                elevated: 0,
            },
            min_tier: 0,
            occupancy: 0,
            status_label: String::new(),
            scene: String::new(),
            shutdown_eligible: false,
            started_at: Some(now),
            empty_since: None,
        }
    }

    /// Whether this record can be polled/deleted through the provisioning API.
    pub fn manageable(&self) -> bool {
        self.external_id.is_some()
    }

    /// Bring the record online: clears the startup timer.
    pub fn mark_online(&mut self) {
        self.state = LifecycleState::Online;
        self.started_at = None;
    }

    /// Record a detected crash or shutdown: occupancy drops to zero and
    /// both advisory timers are cleared.
    pub fn mark_offline(&mut self) {
        self.state = LifecycleState::Offline;
        self.occupancy = 0;
        self.started_at = None;
        self.empty_since = None;
    }

    /// Begin retiring the instance.
    pub fn begin_stopping(&mut self) {
        self.state = LifecycleState::Stopping;
        self.empty_since = None;
    }
}

/// Wire representation of `external_id`: `None` round-trips through the
/// `NOT_SET` sentinel string.
mod external_id_wire {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::EXTERNAL_ID_NOT_SET;

    pub fn serialize<S: Serializer>(v: &Option<String>, s: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(id) => s.serialize_str(id),
            None => s.serialize_str(EXTERNAL_ID_NOT_SET),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        let raw = String::deserialize(d)?;
        Ok(if raw == EXTERNAL_ID_NOT_SET {
            None
        } else {
            Some(raw)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_transitions_allowed() {
        use LifecycleState::*;
        assert!(Offline.transition_allowed(Starting));
        assert!(Starting.transition_allowed(Online));
        assert!(Online.transition_allowed(Stopping));
    }

    #[test]
    fn any_state_may_crash_to_offline() {
        use LifecycleState::*;
        for state in [Offline, Starting, Online, Stopping] {
            assert!(state.transition_allowed(Offline));
        }
    }

    #[test]
    fn skipping_states_is_rejected() {
        use LifecycleState::*;
        assert!(!Offline.transition_allowed(Online));
        assert!(!Starting.transition_allowed(Stopping));
        assert!(!Stopping.transition_allowed(Online));
        assert!(!Stopping.transition_allowed(Starting));
    }

    #[test]
    fn placeholder_is_starting_with_timer() {
        let rec = InstanceRecord::placeholder("pool-3", InstanceRole::Pool, 5000);
        assert_eq!(rec.state, LifecycleState::Starting);
        assert_eq!(rec.started_at, Some(5000));
        assert!(rec.address.is_none());
        assert!(!rec.manageable());
        assert!(!rec.static_instance);
    }

    #[test]
    fn mark_online_clears_startup_timer() {
        let mut rec = InstanceRecord::placeholder("pool-1", InstanceRole::Pool, 5000);
        rec.mark_online();
        assert_eq!(rec.state, LifecycleState::Online);
        assert!(rec.started_at.is_none());
    }

    #[test]
    fn mark_offline_zeroes_occupancy_and_timers() {
        let mut rec = InstanceRecord::placeholder("pool-1", InstanceRole::Pool, 5000);
        rec.mark_online();
        rec.occupancy = 12;
        rec.empty_since = Some(6000);
        rec.mark_offline();
        assert_eq!(rec.state, LifecycleState::Offline);
        assert_eq!(rec.occupancy, 0);
        assert!(rec.empty_since.is_none());
        assert!(rec.started_at.is_none());
    }

    #[test]
    fn external_id_round_trips_through_sentinel() {
        let mut rec = InstanceRecord::placeholder("lobby-1", InstanceRole::Login, 0);
        let json = serde_json::to_string(&rec).unwrap();
        assert!(json.contains("NOT_SET"));
        let back: InstanceRecord = serde_json::from_str(&json).unwrap();
        assert!(back.external_id.is_none());

        rec.external_id = Some("a1b2c3".to_string());
        let json = serde_json::to_string(&rec).unwrap();
        let back: InstanceRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.external_id.as_deref(), Some("a1b2c3"));
    }

    #[test]
    fn endpoint_formatting() {
        let addr = NetAddress::new("10.0.4.2", 25565);
        assert_eq!(addr.endpoint(), "10.0.4.2:25565");
    }
}
