//! vgrid-rpc: the master's view of partition servers.
//!
//! [`PartitionServerClient`] is the seam between the control plane and the
//! data plane. Two implementations ship here:
//!
//! - [`HttpPartitionClient`]: JSON over HTTP/1, one connection per call
//! - [`LocalDataPlane`]: in-process simulated nodes with a call log and
//!   fault injection, used by tests and standalone mode

pub mod client;
pub mod error;
pub mod local;
pub mod transport;
pub mod types;

pub use client::PartitionServerClient;
pub use error::{RpcError, RpcResult};
pub use local::{LocalDataPlane, RpcCall, RpcMethod};
pub use transport::HttpPartitionClient;
pub use types::{
    BackupCommand, BackupRequest, PartitionStatus, RaftStatus, ReplicaState, ResourceLimits, ServerStats,
};
