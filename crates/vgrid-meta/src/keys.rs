//! Key layout of cluster records in the metadata store.
//!
//! ```text
//! /db/id/{db_id}                  → db name
//! /db/name/{db_name}              → db id (decimal)
//! /db/body/{db_id}                → Db
//! /space/{db_id}/{space_id}       → Space
//! /space_config/{db_id}/{space_id}→ engine config
//! /partition/{partition_id}       → Partition
//! /server/{node_id}               → Server (leased)
//! /fail_server/{node_id}          → FailServer
//! /alias/{name}  /user/{name}  /role/{name}
//! ```

use crate::types::{DbId, NodeId, PartitionId, SpaceId};

pub const PREFIX_DB_ID: &str = "/db/id/";
pub const PREFIX_DB_NAME: &str = "/db/name/";
pub const PREFIX_DB_BODY: &str = "/db/body/";
pub const PREFIX_SPACE: &str = "/space/";
pub const PREFIX_SPACE_CONFIG: &str = "/space_config/";
pub const PREFIX_PARTITION: &str = "/partition/";
pub const PREFIX_SERVER: &str = "/server/";
pub const PREFIX_FAIL_SERVER: &str = "/fail_server/";
pub const PREFIX_ALIAS: &str = "/alias/";
pub const PREFIX_USER: &str = "/user/";
pub const PREFIX_ROLE: &str = "/role/";

/// Sequence names for [`crate::MetadataStore::new_id`].
pub const SEQ_DB: &str = "db";
pub const SEQ_SPACE: &str = "space";
pub const SEQ_PARTITION: &str = "partition";
pub const SEQ_NODE: &str = "node";

pub fn db_id(id: DbId) -> String {
    format!("{PREFIX_DB_ID}{id}")
}

pub fn db_name(name: &str) -> String {
    format!("{PREFIX_DB_NAME}{name}")
}

pub fn db_body(id: DbId) -> String {
    format!("{PREFIX_DB_BODY}{id}")
}

pub fn space(db_id: DbId, space_id: SpaceId) -> String {
    format!("{PREFIX_SPACE}{db_id}/{space_id}")
}

/// Prefix of every space in one database.
pub fn spaces_of_db(db_id: DbId) -> String {
    format!("{PREFIX_SPACE}{db_id}/")
}

pub fn space_config(db_id: DbId, space_id: SpaceId) -> String {
    format!("{PREFIX_SPACE_CONFIG}{db_id}/{space_id}")
}

pub fn partition(id: PartitionId) -> String {
    format!("{PREFIX_PARTITION}{id}")
}

pub fn server(id: NodeId) -> String {
    format!("{PREFIX_SERVER}{id}")
}

pub fn fail_server(id: NodeId) -> String {
    format!("{PREFIX_FAIL_SERVER}{id}")
}

pub fn alias(name: &str) -> String {
    format!("{PREFIX_ALIAS}{name}")
}

pub fn user(name: &str) -> String {
    format!("{PREFIX_USER}{name}")
}

pub fn role(name: &str) -> String {
    format!("{PREFIX_ROLE}{name}")
}

// ── Locks ─────────────────────────────────────────────────────────

pub fn lock_db(name: &str) -> String {
    format!("/lock/db/{name}")
}

pub fn lock_space(db_name: &str, space_name: &str) -> String {
    format!("/lock/space/{db_name}/{space_name}")
}

pub fn lock_alias(name: &str) -> String {
    format!("/lock/alias/{name}")
}

pub fn lock_user(name: &str) -> String {
    format!("/lock/user/{name}")
}

pub fn lock_role(name: &str) -> String {
    format!("/lock/role/{name}")
}

/// Cluster-wide lock taken by replica-count changes.
pub const LOCK_CHANGE_REPLICA: &str = "/lock/change_replica";
