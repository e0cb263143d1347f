//! Domain types for the vgrid metadata store.
//!
//! These types represent the persisted cluster metadata: databases,
//! spaces, partitions, data-node servers, and the small catalog records
//! (aliases, users, roles). All types are JSON-serialized into the store.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// Identifier of a data node. `0` means "unset".
pub type NodeId = u64;
pub type PartitionId = u32;
/// Position in the 32-bit routing key space.
pub type SlotId = u32;
pub type DbId = u64;
pub type SpaceId = u64;

// ── DB ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Db {
    pub id: DbId,
    pub name: String,
    /// Explicit allow-list of server IPs. Empty means "all public servers".
    #[serde(default)]
    pub ps: Vec<String>,
}

impl Db {
    pub fn validate(&self) -> Result<(), String> {
        validate_name("db", &self.name)
    }
}

// ── Schema ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Keyword,
    Integer,
    Long,
    Float,
    Double,
    String,
    StringArray,
    Date,
    Vector,
}

/// Vector index configuration carried by the space.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VectorIndex {
    pub name: String,
    pub index_type: String,
    pub metric_type: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimension: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<VectorIndex>,
}

/// Validate a field list: unique non-empty names, vectors carry a dimension.
pub fn validate_schema(fields: &[Field]) -> Result<(), String> {
    if fields.is_empty() {
        return Err("space must define at least one field".to_string());
    }
    let mut seen = HashSet::new();
    for f in fields {
        if f.name.is_empty() {
            return Err("field name must not be empty".to_string());
        }
        if !seen.insert(f.name.as_str()) {
            return Err(format!("duplicate field name: {}", f.name));
        }
        if f.field_type == FieldType::Vector && f.dimension.unwrap_or(0) == 0 {
            return Err(format!("vector field {} needs a positive dimension", f.name));
        }
        if f.field_type != FieldType::Vector && f.dimension.is_some() {
            return Err(format!("field {} is not a vector but has a dimension", f.name));
        }
    }
    Ok(())
}

/// Merge a new schema into an existing one.
///
/// Fields present in both must be identical; the result is the old schema
/// followed by every net-new field in the order given.
pub fn merge_schema(old: &[Field], new: &[Field]) -> Result<Vec<Field>, String> {
    validate_schema(new)?;
    let by_name: HashMap<&str, &Field> = old.iter().map(|f| (f.name.as_str(), f)).collect();
    let mut merged = old.to_vec();
    for f in new {
        match by_name.get(f.name.as_str()) {
            Some(existing) if *existing != f => {
                return Err(format!(
                    "field {} cannot change: old {:?} new {:?}",
                    f.name, existing.field_type, f.field_type
                ));
            }
            Some(_) => {}
            None => merged.push(f.clone()),
        }
    }
    Ok(merged)
}

// ── Partition rule ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RangeDef {
    pub name: String,
    /// Exclusive upper bound of the range on the rule field.
    pub value: i64,
}

/// Named ranges splitting a space; each range holds `partition_num` partitions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PartitionRule {
    pub field: String,
    pub ranges: Vec<RangeDef>,
    /// Number of ranges; kept in sync with `ranges.len()`.
    #[serde(default)]
    pub partitions: u32,
}

impl PartitionRule {
    /// Ranges must be non-empty, uniquely named, and strictly increasing.
    pub fn validate(&self) -> Result<(), String> {
        if self.field.is_empty() {
            return Err("partition rule field must not be empty".to_string());
        }
        if self.ranges.is_empty() {
            return Err("partition rule must define at least one range".to_string());
        }
        let mut names = HashSet::new();
        for (i, r) in self.ranges.iter().enumerate() {
            if r.name.is_empty() {
                return Err("range name must not be empty".to_string());
            }
            if !names.insert(r.name.as_str()) {
                return Err(format!("duplicate range name: {}", r.name));
            }
            if i > 0 && r.value <= self.ranges[i - 1].value {
                return Err(format!("range {} is not above the previous range", r.name));
            }
        }
        Ok(())
    }

    /// Check that `added` can be appended without overlapping existing ranges.
    ///
    /// A new bound at or below the current highest bound would split an
    /// existing range, so every added range must sit above all of them.
    pub fn check_no_overlap(&self, added: &[RangeDef]) -> Result<(), String> {
        if added.is_empty() {
            return Err("no ranges to add".to_string());
        }
        let max = self.ranges.iter().map(|r| r.value).max();
        for r in added {
            if self.ranges.iter().any(|e| e.name == r.name) {
                return Err(format!("range {} already exists", r.name));
            }
            if let Some(max) = max {
                if r.value <= max {
                    return Err(format!("range {} overlaps an existing range", r.name));
                }
            }
        }
        let mut candidate = self.clone();
        candidate.ranges.extend(added.iter().cloned());
        candidate.validate()
    }

    pub fn range_count(&self) -> u32 {
        self.ranges.len() as u32
    }
}

// ── Space ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Space {
    pub id: SpaceId,
    pub db_id: DbId,
    pub name: String,
    pub partition_num: u32,
    pub replica_num: u8,
    pub fields: Vec<Field>,
    #[serde(default)]
    pub index: Option<VectorIndex>,
    #[serde(default)]
    pub partition_rule: Option<PartitionRule>,
    #[serde(default)]
    pub partitions: Vec<Partition>,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub resource_name: String,
}

impl Space {
    pub fn validate(&self) -> Result<(), String> {
        validate_name("space", &self.name)?;
        if self.partition_num == 0 {
            return Err("partition_num must be greater than zero".to_string());
        }
        if self.replica_num == 0 {
            return Err("replica_num must be greater than zero".to_string());
        }
        validate_schema(&self.fields)?;
        if let Some(rule) = &self.partition_rule {
            rule.validate()?;
        }
        Ok(())
    }

    /// Index configuration of the first indexed vector field.
    pub fn vector_index(&self) -> Option<&VectorIndex> {
        self.fields
            .iter()
            .filter(|f| f.field_type == FieldType::Vector)
            .find_map(|f| f.index.as_ref())
    }

    /// Declared partition count: `partition_num × ranges` (or `× 1`).
    pub fn expected_partition_count(&self) -> u32 {
        let ranges = self.partition_rule.as_ref().map_or(1, |r| r.range_count());
        self.partition_num * ranges
    }

    pub fn partition(&self, id: PartitionId) -> Option<&Partition> {
        self.partitions.iter().find(|p| p.id == id)
    }

    pub fn partition_mut(&mut self, id: PartitionId) -> Option<&mut Partition> {
        self.partitions.iter_mut().find(|p| p.id == id)
    }
}

// ── Partition ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReplicaStatus {
    Ok,
    NotReady,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Partition {
    pub id: PartitionId,
    pub space_id: SpaceId,
    pub db_id: DbId,
    pub slot: SlotId,
    /// Range label when the space has a partition rule.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub replicas: Vec<NodeId>,
    #[serde(default)]
    pub leader_id: NodeId,
    #[serde(default)]
    pub replica_status: BTreeMap<NodeId, ReplicaStatus>,
}

impl Partition {
    pub fn new(id: PartitionId, space_id: SpaceId, db_id: DbId) -> Self {
        Self {
            id,
            space_id,
            db_id,
            slot: 0,
            name: None,
            replicas: Vec::new(),
            leader_id: 0,
            replica_status: BTreeMap::new(),
        }
    }

    pub fn has_replica(&self, node_id: NodeId) -> bool {
        self.replicas.contains(&node_id)
    }
}

// ── Server ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildVersion {
    pub build_version: String,
    pub commit_id: String,
}

/// Addresses used by the replication transport for one peer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReplicaAddr {
    pub heartbeat: String,
    pub replicate: String,
}

/// A data node, registered under a lease by its heartbeat agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Server {
    pub id: NodeId,
    pub ip: String,
    #[serde(default)]
    pub host_ip: String,
    #[serde(default)]
    pub host_rack: String,
    #[serde(default)]
    pub host_zone: String,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub resource_name: String,
    pub rpc_port: u16,
    #[serde(default)]
    pub raft_heartbeat_port: u16,
    #[serde(default)]
    pub raft_replicate_port: u16,
    #[serde(default)]
    pub partition_ids: Vec<PartitionId>,
    #[serde(default)]
    pub version: Option<BuildVersion>,
}

impl Server {
    pub fn rpc_addr(&self) -> String {
        format!("{}:{}", self.ip, self.rpc_port)
    }

    pub fn replica_addr(&self) -> ReplicaAddr {
        ReplicaAddr {
            heartbeat: format!("{}:{}", self.ip, self.raft_heartbeat_port),
            replicate: format!("{}:{}", self.ip, self.raft_replicate_port),
        }
    }
}

/// A server whose lease expired while it still held partitions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FailServer {
    pub id: NodeId,
    pub time: u64,
    pub node: Server,
}

// ── Catalog ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Alias {
    pub name: String,
    pub db_name: String,
    pub space_name: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Privilege {
    ReadOnly,
    WriteOnly,
    WriteRead,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Role {
    pub name: String,
    /// Resource name → privilege.
    #[serde(default)]
    pub privileges: BTreeMap<String, Privilege>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub name: String,
    /// SHA-256 hex digest of the password.
    pub password_digest: String,
    pub role_name: String,
}

// ── Membership ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MemberOp {
    Add,
    Remove,
}

/// One replica membership change of one partition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemberChange {
    pub partition_id: PartitionId,
    pub node_id: NodeId,
    pub op: MemberOp,
}

/// Quorum member of the metadata store itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreMember {
    pub id: u64,
    pub name: String,
    pub peer_urls: Vec<String>,
}

fn validate_name(kind: &str, name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err(format!("{kind} name must not be empty"));
    }
    if name.starts_with('_') || name.starts_with('-') {
        return Err(format!("{kind} name {name} must start with a letter or digit"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(format!("{kind} name {name} may only contain [a-zA-Z0-9_-]"));
    }
    Ok(())
}
