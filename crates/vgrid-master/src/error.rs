//! Control-plane error taxonomy.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use vgrid_health::HealthError;
use vgrid_meta::{MemberChange, MetaError};
use vgrid_placement::PlacementError;
use vgrid_rpc::RpcError;

pub type MasterResult<T> = Result<T, MasterError>;

/// Stable code for each error class, surfaced to API callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NotFound,
    AlreadyExists,
    ValidationError,
    CapacityError,
    UpstreamUnavailable,
    InternalError,
    Timeout,
    Conflict,
    NotEmpty,
}

#[derive(Debug, Error)]
pub enum MasterError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("insufficient capacity: {0}")]
    Capacity(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("{0} is not empty")]
    NotEmpty(String),

    /// A bulk replica change stopped midway. `applied` lists the changes
    /// that completed; the replica count was not updated.
    #[error("replica change aborted after {} applied changes: {reason}", applied.len())]
    ChangeReplicaAborted {
        applied: Vec<MemberChange>,
        reason: String,
    },
}

impl MasterError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::AlreadyExists(_) => ErrorCode::AlreadyExists,
            Self::Validation(_) => ErrorCode::ValidationError,
            Self::Capacity(_) => ErrorCode::CapacityError,
            Self::UpstreamUnavailable(_) => ErrorCode::UpstreamUnavailable,
            Self::Internal(_) | Self::ChangeReplicaAborted { .. } => ErrorCode::InternalError,
            Self::Timeout(_) => ErrorCode::Timeout,
            Self::Conflict(_) => ErrorCode::Conflict,
            Self::NotEmpty(_) => ErrorCode::NotEmpty,
        }
    }
}

impl From<MetaError> for MasterError {
    fn from(e: MetaError) -> Self {
        match e {
            MetaError::NotFound(k) => Self::NotFound(k),
            MetaError::AlreadyExists(k) => Self::AlreadyExists(k),
            MetaError::Timeout(m) => Self::Timeout(m),
            MetaError::LockHeld(k) => Self::Conflict(format!("lock {k} is held")),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<RpcError> for MasterError {
    fn from(e: RpcError) -> Self {
        match e {
            RpcError::Timeout { addr } => Self::Timeout(format!("rpc to {addr}")),
            RpcError::Meta(m) => m.into(),
            other => Self::UpstreamUnavailable(other.to_string()),
        }
    }
}

impl From<PlacementError> for MasterError {
    fn from(e: PlacementError) -> Self {
        match e {
            PlacementError::ReplicaExceedsServers { .. } => Self::Validation(e.to_string()),
            other => Self::Capacity(other.to_string()),
        }
    }
}

impl From<HealthError> for MasterError {
    fn from(e: HealthError) -> Self {
        match e {
            HealthError::DbNotFound(n) => Self::NotFound(format!("db {n}")),
            HealthError::SpaceNotFound(n) => Self::NotFound(format!("space {n}")),
            HealthError::Meta(m) => m.into(),
        }
    }
}
