//! Health report types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use vgrid_meta::{DbId, NodeId, PartitionId, ReplicaStatus, SpaceId};
use vgrid_rpc::RaftStatus;

/// Ordinal health: a parent is as bad as its worst child.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthLevel {
    #[default]
    Green = 0,
    /// Partial unreachability only.
    Yellow = 1,
    Red = 2,
}

impl HealthLevel {
    pub fn color(self) -> &'static str {
        match self {
            Self::Green => "green",
            Self::Yellow => "yellow",
            Self::Red => "red",
        }
    }

    pub fn ordinal(self) -> u8 {
        self as u8
    }

    /// Worst of all levels, green when empty.
    pub fn worst(levels: impl IntoIterator<Item = HealthLevel>) -> HealthLevel {
        levels.into_iter().max().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PartitionInfo {
    pub partition_id: PartitionId,
    #[serde(default)]
    pub name: Option<String>,
    pub status: HealthLevel,
    /// Replicas listed in the partition record.
    pub replica_num: usize,
    /// Node that answered the status query.
    pub node_id: NodeId,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub unreachable: Vec<NodeId>,
    #[serde(default)]
    pub replica_status: BTreeMap<NodeId, ReplicaStatus>,
    #[serde(default)]
    pub raft: Option<RaftStatus>,
    #[serde(default)]
    pub doc_num: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpaceInfo {
    pub space_id: SpaceId,
    pub db_id: DbId,
    pub name: String,
    pub partition_num: u32,
    pub replica_num: u8,
    pub enabled: bool,
    pub status: HealthLevel,
    pub doc_num: u64,
    pub errors: Vec<String>,
    pub partitions: Vec<PartitionInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DbInfo {
    pub db_id: DbId,
    pub name: String,
    pub space_num: usize,
    pub status: HealthLevel,
    pub errors: Vec<String>,
    pub spaces: Vec<SpaceInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterInfo {
    pub status: HealthLevel,
    pub dbs: Vec<DbInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_are_ordered() {
        assert!(HealthLevel::Green < HealthLevel::Yellow);
        assert!(HealthLevel::Yellow < HealthLevel::Red);
        assert_eq!(HealthLevel::Red.ordinal(), 2);
    }

    #[test]
    fn worst_of_children() {
        assert_eq!(HealthLevel::worst([]), HealthLevel::Green);
        assert_eq!(
            HealthLevel::worst([HealthLevel::Green, HealthLevel::Yellow]),
            HealthLevel::Yellow
        );
        assert_eq!(
            HealthLevel::worst([HealthLevel::Red, HealthLevel::Yellow]),
            HealthLevel::Red
        );
    }

    #[test]
    fn serializes_as_color_name() {
        let json = serde_json::to_string(&HealthLevel::Yellow).unwrap();
        assert_eq!(json, "\"yellow\"");
        assert_eq!(HealthLevel::Red.color(), "red");
    }
}
