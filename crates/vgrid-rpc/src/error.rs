//! Error types for partition-server RPCs.

use thiserror::Error;

pub type RpcResult<T> = Result<T, RpcError>;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("{addr} is unreachable: {reason}")]
    Unreachable { addr: String, reason: String },

    #[error("{addr} timed out")]
    Timeout { addr: String },

    /// The node answered with a failure.
    #[error("{addr} returned error {code}: {message}")]
    Remote {
        addr: String,
        code: i32,
        message: String,
    },

    #[error("malformed response from {addr}: {reason}")]
    Decode { addr: String, reason: String },

    #[error("metadata error: {0}")]
    Meta(#[from] vgrid_meta::MetaError),
}

impl RpcError {
    pub fn unreachable(addr: &str, reason: impl ToString) -> Self {
        Self::Unreachable {
            addr: addr.to_string(),
            reason: reason.to_string(),
        }
    }
}
