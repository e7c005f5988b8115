//! Controller configuration and the static instance roster.

use serde::Deserialize;

use fleet_state::{Capacity, InstanceRole};

/// Tunables for the reconciliation + scaling tick.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Seconds between reconciliation ticks.
    pub tick_interval_secs: u64,
    /// Seconds an instance may sit in `Starting` before the watchdog
    /// force-retires it.
    pub startup_timeout_secs: u64,
    /// Seconds of continuous zero occupancy before an instance becomes
    /// scale-down eligible.
    pub idle_shutdown_secs: u64,
    /// Fraction of normal capacity above which an instance no longer
    /// counts as available warm-pool headroom.
    pub full_threshold: f64,
    /// Minimum number of available (online, under-threshold) pool
    /// instances to keep warm.
    pub min_idle: u32,
    /// Hard ceiling on concurrently online pool instances.
    pub max_pool_size: u32,
    /// Name prefix for auto-provisioned pool instances.
    pub pool_prefix: String,
    /// Pool names run `{prefix}1 ..= {prefix}{pool_namespace_end}`.
    pub pool_namespace_end: u32,
    /// Capacity assigned to freshly created pool instances.
    pub pool_capacity: Capacity,
    /// Published aggregate capacity never drops below this floor.
    pub capacity_floor: u32,
    /// Attempt budget for the post-create start sequence.
    pub start_attempts: u32,
    /// Fixed delay between start attempts, in seconds.
    pub start_delay_secs: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 10,
            startup_timeout_secs: 120,
            idle_shutdown_secs: 60,
            full_threshold: 0.70,
            min_idle: 2,
            max_pool_size: 100,
            pool_prefix: "pool-".to_string(),
            pool_namespace_end: 100,
            pool_capacity: Capacity {
                normal: 50,
                elevated: 60,
            },
            capacity_floor: 100,
            start_attempts: 10,
            start_delay_secs: 3,
        }
    }
}

/// One statically-provisioned instance, synchronized into the store at boot.
///
/// Static instances are not managed by the provisioning API: no external id,
/// never auto-deleted, exempt from idle scale-down.
#[derive(Debug, Clone, Deserialize)]
pub struct StaticInstance {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub host: String,
    pub port: u16,
    pub role: InstanceRole,
    pub capacity: Capacity,
    #[serde(default)]
    pub min_tier: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_policy_examples() {
        let cfg = ControllerConfig::default();
        assert_eq!(cfg.tick_interval_secs, 10);
        assert_eq!(cfg.idle_shutdown_secs, 60);
        assert_eq!(cfg.start_attempts, 10);
        assert!((cfg.full_threshold - 0.70).abs() < f64::EPSILON);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let cfg: ControllerConfig =
            serde_json::from_str(r#"{"min_idle": 4, "max_pool_size": 20}"#).unwrap();
        assert_eq!(cfg.min_idle, 4);
        assert_eq!(cfg.max_pool_size, 20);
        assert_eq!(cfg.tick_interval_secs, 10);
        assert_eq!(cfg.pool_prefix, "pool-");
    }

    #[test]
    fn static_instance_parses() {
        let raw = r#"{
            "name": "lobby-1",
            "host": "10.0.4.10",
            "port": 25565,
            "role": "login",
            "capacity": { "normal": 80, "elevated": 100 }
        }"#;
        let si: StaticInstance = serde_json::from_str(raw).unwrap();
        assert_eq!(si.name, "lobby-1");
        assert_eq!(si.role, InstanceRole::Login);
        assert_eq!(si.min_tier, 0);
        assert!(si.display_name.is_none());
    }
}
