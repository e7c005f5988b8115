//! redb table definitions for the fleet store.
//!
//! A single table holds every instance record, `&str` keys (the unique
//! instance name) and `&[u8]` values (JSON-serialized records).

use redb::TableDefinition;

/// Instance records keyed by instance name.
pub const INSTANCES: TableDefinition<&str, &[u8]> = TableDefinition::new("instances");
