//! fleet-state — instance records and the persistent fleet store.
//!
//! Backed by [redb](https://docs.rs/redb). An [`InstanceRecord`] is the
//! authoritative description of one fleet member: identity, network
//! address, capacity, role and lifecycle state. Records are JSON-serialized
//! into redb's `&[u8]` value column, keyed by the unique instance name.
//!
//! The [`InstanceStore`] is `Clone` + `Send` + `Sync` (backed by
//! `Arc<Database>`) and tolerates concurrent access from heartbeat
//! ingestion and the reconciliation loop.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StoreError, StoreResult};
pub use store::InstanceStore;
pub use types::*;
