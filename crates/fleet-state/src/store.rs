//! InstanceStore — redb-backed persistence for instance records.
//!
//! Typed CRUD over the instances table. Values are JSON-serialized into
//! redb's `&[u8]` column. Supports on-disk and in-memory backends (the
//! latter for testing). A store handle observes its own prior writes.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::tables::INSTANCES;
use crate::types::{InstanceRecord, InstanceRole, LifecycleState};

/// Convert any `Display` error into a `StoreError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StoreError::$variant(e.to_string())
    };
}

/// Thread-safe fleet store backed by redb.
#[derive(Clone)]
pub struct InstanceStore {
    db: Arc<Database>,
}

impl InstanceStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "fleet store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory fleet store opened");
        Ok(store)
    }

    /// Create the instances table if it doesn't exist yet.
    fn ensure_tables(&self) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(INSTANCES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Insert or update an instance record.
    pub fn save(&self, record: &InstanceRecord) -> StoreResult<()> {
        let value = serde_json::to_vec(record).map_err(map_err!(Encode))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
            table
                .insert(record.name.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(name = %record.name, state = ?record.state, "instance record saved");
        Ok(())
    }

    /// Look up a record by its unique name.
    pub fn find_by_name(&self, name: &str) -> StoreResult<Option<InstanceRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
        match table.get(name).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: InstanceRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Decode))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// All records of a role in a given lifecycle state.
    pub fn find_by_role_and_state(
        &self,
        role: InstanceRole,
        state: LifecycleState,
    ) -> StoreResult<Vec<InstanceRecord>> {
        Ok(self
            .list_all()?
            .into_iter()
            .filter(|r| r.role == role && r.state == state)
            .collect())
    }

    /// List every record in the fleet.
    pub fn list_all(&self) -> StoreResult<Vec<InstanceRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: InstanceRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Decode))?;
            results.push(record);
        }
        Ok(results)
    }

    /// Delete a record by name. Returns true if it existed.
    pub fn delete(&self, name: &str) -> StoreResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
            existed = table.remove(name).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%name, existed, "instance record deleted");
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Capacity, NetAddress};

    fn test_record(name: &str, role: InstanceRole, state: LifecycleState) -> InstanceRecord {
        InstanceRecord {
            name: name.to_string(),
            display_name: name.to_uppercase(),
            address: Some(NetAddress::new("10.0.0.1", 25565)),
            external_id: Some(format!("ext-{name}")),
            internal_id: Some(7),
            role,
            static_instance: false,
            state,
            capacity: Capacity {
                normal: 50,
                elevated: 60,
            },
            min_tier: 0,
            occupancy: 3,
            status_label: "waiting".to_string(),
            scene: "overworld".to_string(),
            shutdown_eligible: false,
            started_at: None,
            empty_since: None,
        }
    }

    #[test]
    fn save_and_find_by_name() {
        let store = InstanceStore::open_in_memory().unwrap();
        let rec = test_record("pool-1", InstanceRole::Pool, LifecycleState::Online);

        store.save(&rec).unwrap();
        let found = store.find_by_name("pool-1").unwrap();

        assert_eq!(found, Some(rec));
    }

    #[test]
    fn find_unknown_name_returns_none() {
        let store = InstanceStore::open_in_memory().unwrap();
        assert!(store.find_by_name("ghost").unwrap().is_none());
    }

    #[test]
    fn save_updates_in_place() {
        let store = InstanceStore::open_in_memory().unwrap();
        let mut rec = test_record("pool-1", InstanceRole::Pool, LifecycleState::Starting);
        store.save(&rec).unwrap();

        rec.mark_online();
        rec.occupancy = 17;
        store.save(&rec).unwrap();

        let found = store.find_by_name("pool-1").unwrap().unwrap();
        assert_eq!(found.state, LifecycleState::Online);
        assert_eq!(found.occupancy, 17);
        assert_eq!(store.list_all().unwrap().len(), 1);
    }

    #[test]
    fn find_by_role_and_state_filters() {
        let store = InstanceStore::open_in_memory().unwrap();
        store
            .save(&test_record("pool-1", InstanceRole::Pool, LifecycleState::Online))
            .unwrap();
        store
            .save(&test_record("pool-2", InstanceRole::Pool, LifecycleState::Starting))
            .unwrap();
        store
            .save(&test_record("lobby-1", InstanceRole::Login, LifecycleState::Online))
            .unwrap();

        let online_pool = store
            .find_by_role_and_state(InstanceRole::Pool, LifecycleState::Online)
            .unwrap();
        assert_eq!(online_pool.len(), 1);
        assert_eq!(online_pool[0].name, "pool-1");
    }

    #[test]
    fn delete_is_idempotent() {
        let store = InstanceStore::open_in_memory().unwrap();
        store
            .save(&test_record("pool-1", InstanceRole::Pool, LifecycleState::Online))
            .unwrap();

        assert!(store.delete("pool-1").unwrap());
        assert!(!store.delete("pool-1").unwrap());
        assert!(store.find_by_name("pool-1").unwrap().is_none());
    }

    #[test]
    fn list_all_returns_every_record() {
        let store = InstanceStore::open_in_memory().unwrap();
        for i in 1..=4 {
            store
                .save(&test_record(
                    &format!("pool-{i}"),
                    InstanceRole::Pool,
                    LifecycleState::Online,
                ))
                .unwrap();
        }
        assert_eq!(store.list_all().unwrap().len(), 4);
    }

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("fleet.redb");

        {
            let store = InstanceStore::open(&db_path).unwrap();
            store
                .save(&test_record("lobby-1", InstanceRole::Login, LifecycleState::Online))
                .unwrap();
        }

        let store = InstanceStore::open(&db_path).unwrap();
        let rec = store.find_by_name("lobby-1").unwrap();
        assert!(rec.is_some());
        assert_eq!(rec.unwrap().display_name, "LOBBY-1");
    }

    #[test]
    fn empty_store_operations() {
        let store = InstanceStore::open_in_memory().unwrap();
        assert!(store.list_all().unwrap().is_empty());
        assert!(
            store
                .find_by_role_and_state(InstanceRole::Pool, LifecycleState::Online)
                .unwrap()
                .is_empty()
        );
        assert!(!store.delete("nope").unwrap());
    }
}
