//! Request and status payloads exchanged with partition servers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use vgrid_meta::{MemberOp, NodeId, PartitionId, Space};

/// Replication role of one replica as reported by the group leader.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReplicaState {
    /// Leader side of the group; exactly one replica should report it.
    Probe,
    Replicate,
    Snapshot,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RaftStatus {
    pub leader: NodeId,
    pub term: u64,
    pub replicas: BTreeMap<NodeId, ReplicaState>,
}

/// Live status of one partition as seen by the queried replica.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PartitionStatus {
    pub partition_id: PartitionId,
    #[serde(default)]
    pub raft: Option<RaftStatus>,
    /// Peers the queried replica cannot reach.
    #[serde(default)]
    pub unreachable: Vec<NodeId>,
    #[serde(default)]
    pub doc_num: u64,
    #[serde(default)]
    pub error: Option<String>,
}

/// Threshold check request; the node errors if a limit is exceeded.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResourceLimits {
    #[serde(default)]
    pub memory_percent: Option<f64>,
    #[serde(default)]
    pub disk_percent: Option<f64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackupCommand {
    Create,
    Restore,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackupRequest {
    pub command: BackupCommand,
    pub db_name: String,
    pub space_name: String,
    /// Object-storage location understood by the node.
    pub location: String,
}

/// Per-server statistics. `error` is set when the server could not be queried.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ServerStats {
    pub addr: String,
    #[serde(default)]
    pub node_id: NodeId,
    #[serde(default)]
    pub partition_ids: Vec<PartitionId>,
    #[serde(default)]
    pub mem_used_bytes: u64,
    #[serde(default)]
    pub disk_used_bytes: u64,
    #[serde(default)]
    pub error: Option<String>,
}

impl ServerStats {
    pub fn failed(addr: &str, error: impl ToString) -> Self {
        Self {
            addr: addr.to_string(),
            error: Some(error.to_string()),
            ..Self::default()
        }
    }
}

// ── Wire payloads ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionRequest {
    pub partition_id: PartitionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space: Option<Space>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeMemberRequest {
    pub partition_id: PartitionId,
    pub node_id: NodeId,
    pub op: MemberOp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionInfoRequest {
    pub partition_id: PartitionId,
    pub verbose: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineCfgRequest {
    pub partition_id: PartitionId,
    #[serde(default)]
    pub cfg: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLimitRequest {
    pub partition_id: PartitionId,
    pub limits: ResourceLimits,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupSpaceRequest {
    pub partition_id: PartitionId,
    pub request: BackupRequest,
}

/// Response envelope. `code == 0` is success.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply<T> {
    pub code: i32,
    #[serde(default)]
    pub msg: String,
    pub data: Option<T>,
}
