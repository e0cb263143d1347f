//! redb table definitions for the vgrid metadata store.
//!
//! Every table uses `&str` keys and `&[u8]` values. Cluster records live in
//! the single `kv` table under the path-like keys built in [`crate::keys`].

use redb::TableDefinition;

/// Cluster records keyed by path (`/space/{db}/{space}`, `/server/{id}` ...).
pub const KV: TableDefinition<&str, &[u8]> = TableDefinition::new("kv");

/// Advisory locks keyed by lock path; value is a JSON `LockRecord`.
pub const LOCKS: TableDefinition<&str, &[u8]> = TableDefinition::new("locks");

/// Monotonic id sequences keyed by sequence name; value is a big-endian u64.
pub const SEQUENCES: TableDefinition<&str, &[u8]> = TableDefinition::new("sequences");

/// Keys written under a lease. Leases do not survive a restart, so these
/// keys are purged when the store is reopened.
pub const LEASED: TableDefinition<&str, &[u8]> = TableDefinition::new("leased");

/// Quorum members of the store keyed by member id.
pub const MEMBERS: TableDefinition<&str, &[u8]> = TableDefinition::new("members");
