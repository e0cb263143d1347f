//! Error types for placement planning.

use thiserror::Error;
use vgrid_meta::PartitionId;

pub type PlacementResult<T> = Result<T, PlacementError>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlacementError {
    #[error("partition {partition_id}: need {wanted} replicas, only {selected} eligible servers")]
    Capacity {
        partition_id: PartitionId,
        wanted: usize,
        selected: usize,
    },

    #[error("no eligible servers: {0}")]
    NoCandidates(String),

    #[error("replica count {wanted} exceeds {servers} eligible servers")]
    ReplicaExceedsServers { wanted: usize, servers: usize },
}
