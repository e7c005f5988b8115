//! The fleet controller — reconciliation, scaling, and heartbeat ingestion.
//!
//! The controller is driven by two independent signals: heartbeats pushed
//! by the instances themselves (arbitrary frequency, store writes only) and
//! the periodic reconciliation tick. Corrections are rate-limited to one
//! scale-up and one scale-down per tick so a large fleet settles over a few
//! intervals instead of thrashing the provisioning API.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use fleet_provision::{PowerState, Provisioner, StatusQuery};
use fleet_routing::RoutingTable;
use fleet_state::{
    InstanceRecord, InstanceRole, InstanceStore, LifecycleState, NetAddress, StoreResult,
};

use crate::capacity::CapacityPublisher;
use crate::config::{ControllerConfig, StaticInstance};
use crate::heartbeat::Heartbeat;

/// Orchestrates the fleet: authoritative records, drift correction against
/// the provisioning backend, and the scaling policy.
pub struct FleetController {
    store: InstanceStore,
    provisioner: Arc<dyn Provisioner>,
    routing: Arc<dyn RoutingTable>,
    capacity: Arc<dyn CapacityPublisher>,
    cfg: ControllerConfig,
}

impl FleetController {
    pub fn new(
        store: InstanceStore,
        provisioner: Arc<dyn Provisioner>,
        routing: Arc<dyn RoutingTable>,
        capacity: Arc<dyn CapacityPublisher>,
        cfg: ControllerConfig,
    ) -> Self {
        Self {
            store,
            provisioner,
            routing,
            capacity,
            cfg,
        }
    }

    /// Synchronize the statically-configured instances into the store.
    ///
    /// Called once at boot. Existing records keep their lifecycle state and
    /// occupancy; identity fields are refreshed from the roster. Dynamic
    /// records are untouched.
    pub fn sync_static_roster(&self, roster: &[StaticInstance]) -> StoreResult<()> {
        for entry in roster {
            let display_name = entry
                .display_name
                .clone()
                .unwrap_or_else(|| entry.name.clone());
            let address = NetAddress::new(entry.host.clone(), entry.port);

            let rec = match self.store.find_by_name(&entry.name)? {
                Some(mut existing) => {
                    existing.display_name = display_name;
                    existing.address = Some(address);
                    existing.role = entry.role;
                    existing.static_instance = true;
                    existing.capacity = entry.capacity;
                    existing.min_tier = entry.min_tier;
                    existing
                }
                None => {
                    let mut rec = InstanceRecord::placeholder(&entry.name, entry.role, 0);
                    rec.display_name = display_name;
                    rec.address = Some(address);
                    rec.static_instance = true;
                    rec.state = LifecycleState::Offline;
                    rec.started_at = None;
                    rec.capacity = entry.capacity;
                    rec.min_tier = entry.min_tier;
                    rec
                }
            };
            self.store.save(&rec)?;
        }
        info!(count = roster.len(), "static roster synchronized");
        Ok(())
    }

    /// Ingest one heartbeat. Updates the matching record where fields
    /// differ; unknown names are ignored, and self-reported state changes
    /// that skip lifecycle steps are rejected. Never blocks: store writes
    /// only.
    pub fn ingest(&self, hb: &Heartbeat) -> StoreResult<()> {
        let Some(mut rec) = self.store.find_by_name(&hb.name)? else {
            debug!(name = %hb.name, "heartbeat for unknown instance ignored");
            return Ok(());
        };

        let mut changed = false;
        if let Some(addr) = &hb.address
            && rec.address.as_ref() != Some(addr)
        {
            rec.address = Some(addr.clone());
            changed = true;
        }
        if rec.state != hb.state {
            if rec.state.transition_allowed(hb.state) {
                match hb.state {
                    LifecycleState::Online => rec.mark_online(),
                    LifecycleState::Offline => rec.mark_offline(),
                    LifecycleState::Starting => {
                        rec.state = LifecycleState::Starting;
                        rec.started_at.get_or_insert(epoch_secs());
                    }
                    LifecycleState::Stopping => rec.begin_stopping(),
                }
                changed = true;
            } else {
                // Self-reported states cannot skip lifecycle steps; drift
                // detection corrects against the provider instead.
                warn!(
                    name = %hb.name,
                    from = ?rec.state,
                    to = ?hb.state,
                    "heartbeat state transition rejected"
                );
            }
        }
        if rec.occupancy != hb.occupancy {
            rec.occupancy = hb.occupancy;
            changed = true;
        }
        if hb.occupancy > 0 && rec.empty_since.is_some() {
            rec.empty_since = None;
            changed = true;
        }
        if rec.status_label != hb.status_label {
            rec.status_label = hb.status_label.clone();
            changed = true;
        }
        if rec.scene != hb.scene {
            rec.scene = hb.scene.clone();
            changed = true;
        }
        if rec.shutdown_eligible != hb.shutdown_eligible {
            rec.shutdown_eligible = hb.shutdown_eligible;
            changed = true;
        }

        if changed {
            self.store.save(&rec)?;
        }

        if rec.state == LifecycleState::Online
            && !self.routing.contains(&rec.name)
            && let Some(addr) = &rec.address
        {
            self.routing.register(&rec.name, addr);
        }
        Ok(())
    }

    /// One reconciliation + scaling tick.
    pub async fn tick(&self) {
        let now = epoch_secs();
        let records = match self.store.list_all() {
            Ok(r) => r,
            Err(e) => {
                error!(error = %e, "failed to load fleet snapshot, skipping tick");
                return;
            }
        };

        // Watchdog + drift detection. One record's failure never blocks
        // the rest of the fleet.
        for rec in &records {
            if rec.state == LifecycleState::Starting
                && rec
                    .started_at
                    .is_some_and(|t| now.saturating_sub(t) > self.cfg.startup_timeout_secs)
            {
                // Static instances are never auto-deleted; mark them down
                // and let the roster owner intervene.
                if rec.static_instance {
                    warn!(name = %rec.name, "static instance stuck in starting, marking offline");
                    let mut r = rec.clone();
                    r.mark_offline();
                    if let Err(e) = self.store.save(&r) {
                        error!(name = %r.name, error = %e, "failed to mark instance offline");
                    }
                } else {
                    warn!(name = %rec.name, "startup watchdog expired, force-retiring");
                    self.retire(rec).await;
                }
                continue;
            }
            if let Some(external_id) = rec.external_id.clone() {
                self.reconcile_record(rec, &external_id).await;
            }
        }

        // Policy decisions run against the corrected snapshot.
        let records = match self.store.list_all() {
            Ok(r) => r,
            Err(e) => {
                error!(error = %e, "failed to reload fleet snapshot");
                return;
            }
        };

        let online_elevated: u32 = records
            .iter()
            .filter(|r| r.state == LifecycleState::Online)
            .map(|r| r.capacity.elevated)
            .sum();
        self.capacity
            .publish(online_elevated.max(self.cfg.capacity_floor));

        let pool: Vec<&InstanceRecord> = records
            .iter()
            .filter(|r| r.role == InstanceRole::Pool)
            .collect();
        let starting = pool.iter().any(|r| r.state == LifecycleState::Starting);
        let active = pool
            .iter()
            .filter(|r| r.state == LifecycleState::Online)
            .count() as u32;
        let available = pool
            .iter()
            .filter(|r| {
                r.state == LifecycleState::Online
                    && f64::from(r.occupancy)
                        < self.cfg.full_threshold * f64::from(r.capacity.normal)
            })
            .count() as u32;

        debug!(active, available, starting, "pool snapshot");

        if starting {
            debug!("a pool instance is already starting, holding scale-up");
        } else if active < self.cfg.max_pool_size && available < self.cfg.min_idle {
            self.scale_up(&records, now).await;
            return; // one creation per tick
        }

        if available > self.cfg.min_idle {
            self.scale_down(&records, now).await;
        }
    }

    /// Run the controller loop until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.cfg.tick_interval_secs,
            "fleet controller started"
        );
        let interval = Duration::from_secs(self.cfg.tick_interval_secs);
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => self.tick().await,
                _ = shutdown.changed() => {
                    info!("fleet controller shutting down");
                    break;
                }
            }
        }
    }

    /// Compare one record against the provider's real status and correct
    /// drift.
    async fn reconcile_record(&self, rec: &InstanceRecord, external_id: &str) {
        let status = match self.provisioner.status(external_id).await {
            StatusQuery::Found(status) => status,
            StatusQuery::NotFound => {
                if rec.static_instance {
                    warn!(name = %rec.name, "provider has no record of static instance, leaving as-is");
                } else {
                    info!(name = %rec.name, "orphaned instance, purging");
                    self.routing.unregister(&rec.name);
                    if let Err(e) = self.store.delete(&rec.name) {
                        error!(name = %rec.name, error = %e, "failed to purge orphan");
                    }
                }
                return;
            }
            StatusQuery::Unavailable => {
                // Real state unknown; touch nothing, retry next tick.
                debug!(name = %rec.name, "status query unanswered, skipping drift check");
                return;
            }
        };

        match status.state {
            PowerState::Running => {
                if rec.state == LifecycleState::Stopping && !rec.static_instance {
                    // Deletion was already requested; retry it.
                    self.retire(rec).await;
                } else if rec.state != LifecycleState::Online {
                    let mut r = rec.clone();
                    r.mark_online();
                    if let Err(e) = self.store.save(&r) {
                        error!(name = %r.name, error = %e, "failed to mark instance online");
                        return;
                    }
                    info!(name = %r.name, "instance detected online");
                    if let Some(addr) = &r.address {
                        self.routing.register(&r.name, addr);
                    }
                }
            }
            PowerState::Offline => match rec.state {
                LifecycleState::Starting => {
                    debug!(name = %rec.name, "provider dropped the start signal, re-issuing");
                    self.provisioner.start(external_id).await;
                }
                LifecycleState::Online | LifecycleState::Stopping => {
                    let was_stopping = rec.state == LifecycleState::Stopping;
                    let mut r = rec.clone();
                    r.mark_offline();
                    if let Err(e) = self.store.save(&r) {
                        error!(name = %r.name, error = %e, "failed to mark instance offline");
                        return;
                    }
                    self.routing.unregister(&r.name);
                    warn!(name = %r.name, "instance detected offline");
                    if was_stopping && !r.static_instance {
                        self.retire(&r).await;
                    }
                }
                LifecycleState::Offline => {}
            },
            // Converging; leave for the next tick.
            PowerState::Starting | PowerState::Stopping => {}
        }
    }

    /// Create one new pool instance.
    async fn scale_up(&self, records: &[InstanceRecord], now: u64) {
        let taken: HashSet<&str> = records.iter().map(|r| r.name.as_str()).collect();
        let Some(name) =
            allocate_pool_name(&taken, &self.cfg.pool_prefix, self.cfg.pool_namespace_end)
        else {
            error!(
                prefix = %self.cfg.pool_prefix,
                limit = self.cfg.pool_namespace_end,
                "pool namespace exhausted, cannot scale up"
            );
            return;
        };

        let mut rec = InstanceRecord::placeholder(&name, InstanceRole::Pool, now);
        rec.capacity = self.cfg.pool_capacity;
        if let Err(e) = self.store.save(&rec) {
            error!(%name, error = %e, "failed to persist placeholder record");
            return;
        }
        info!(%name, "scaling up");

        match self.provisioner.create(&name, InstanceRole::Pool).await {
            None => {
                warn!(%name, "create failed, rolling back placeholder");
                if let Err(e) = self.store.delete(&name) {
                    error!(%name, error = %e, "failed to roll back placeholder");
                }
            }
            Some(created) => {
                rec.external_id = Some(created.external_id.clone());
                rec.internal_id = Some(created.internal_id);
                if let Err(e) = self.store.save(&rec) {
                    error!(%name, error = %e, "failed to persist provider ids");
                    return;
                }
                let provisioner = Arc::clone(&self.provisioner);
                let attempts = self.cfg.start_attempts;
                let delay = Duration::from_secs(self.cfg.start_delay_secs);
                tokio::spawn(async move {
                    aggressive_start(provisioner, created.external_id, attempts, delay).await;
                });
            }
        }
    }

    /// Retire at most one idle pool instance.
    async fn scale_down(&self, records: &[InstanceRecord], now: u64) {
        for rec in records {
            if rec.role != InstanceRole::Pool
                || rec.static_instance
                || rec.state != LifecycleState::Online
            {
                continue;
            }

            if rec.occupancy > 0 {
                if rec.empty_since.is_some() {
                    let mut r = rec.clone();
                    r.empty_since = None;
                    if let Err(e) = self.store.save(&r) {
                        error!(name = %r.name, error = %e, "failed to clear idle timer");
                    }
                }
                continue;
            }

            match rec.empty_since {
                None => {
                    let mut r = rec.clone();
                    r.empty_since = Some(now);
                    if let Err(e) = self.store.save(&r) {
                        error!(name = %r.name, error = %e, "failed to start idle timer");
                    }
                }
                Some(since)
                    if now.saturating_sub(since) > self.cfg.idle_shutdown_secs
                        && rec.shutdown_eligible =>
                {
                    info!(
                        name = %rec.name,
                        idle_secs = now.saturating_sub(since),
                        "idle instance scaling down"
                    );
                    let mut r = rec.clone();
                    r.begin_stopping();
                    if let Err(e) = self.store.save(&r) {
                        error!(name = %r.name, error = %e, "failed to mark instance stopping");
                        continue;
                    }
                    self.routing.unregister(&r.name);
                    self.retire(&r).await;
                    return; // one deletion per tick
                }
                Some(_) => {}
            }
        }
    }

    /// The deletion procedure. Idempotent: a record without an internal id
    /// only has a store row to drop; otherwise the row is removed only
    /// after the provider confirms deletion, and a failed delete leaves the
    /// record untouched so the next tick retries.
    pub async fn retire(&self, rec: &InstanceRecord) -> bool {
        self.routing.unregister(&rec.name);
        match rec.internal_id {
            None => match self.store.delete(&rec.name) {
                Ok(_) => true,
                Err(e) => {
                    error!(name = %rec.name, error = %e, "failed to delete record");
                    false
                }
            },
            Some(internal_id) => {
                if self.provisioner.delete(internal_id).await {
                    match self.store.delete(&rec.name) {
                        Ok(_) => {
                            info!(name = %rec.name, "instance retired");
                            true
                        }
                        Err(e) => {
                            error!(name = %rec.name, error = %e, "failed to delete record");
                            false
                        }
                    }
                } else {
                    warn!(
                        name = %rec.name,
                        internal_id,
                        "deletion failed, leaving record for retry next tick"
                    );
                    false
                }
            }
        }
    }
}

/// Bounded post-create start sequence: wait out installation, nudge the
/// server with `start` until the provider reports it coming up, then give
/// up silently and let the reconciliation loop take over.
pub(crate) async fn aggressive_start(
    provisioner: Arc<dyn Provisioner>,
    external_id: String,
    attempts: u32,
    delay: Duration,
) {
    for attempt in 1..=attempts {
        tokio::time::sleep(delay).await;
        let StatusQuery::Found(status) = provisioner.status(&external_id).await else {
            continue;
        };
        if status.installing {
            debug!(%external_id, attempt, "server still installing");
            continue;
        }
        if matches!(status.state, PowerState::Running | PowerState::Starting) {
            debug!(%external_id, attempt, "server coming up");
            return;
        }
        provisioner.start(&external_id).await;
    }
    debug!(%external_id, "start attempts exhausted; next reconciliation tick takes over");
}

/// First unused name in the bounded pool namespace, `{prefix}1..{prefix}{end}`.
fn allocate_pool_name(taken: &HashSet<&str>, prefix: &str, end: u32) -> Option<String> {
    (1..=end)
        .map(|n| format!("{prefix}{n}"))
        .find(|name| !taken.contains(name.as_str()))
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
