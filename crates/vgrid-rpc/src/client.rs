//! The `PartitionServerClient` abstraction.
//!
//! One method per RPC. Callers pass the target address resolved from the
//! current metadata snapshot; implementations keep no connection cache.

use async_trait::async_trait;
use vgrid_meta::{MemberOp, NodeId, PartitionId, Space};

use crate::error::RpcResult;
use crate::types::{BackupRequest, PartitionStatus, ResourceLimits, ServerStats};

#[async_trait]
pub trait PartitionServerClient: Send + Sync {
    async fn create_partition(&self, addr: &str, space: &Space, partition_id: PartitionId) -> RpcResult<()>;

    async fn delete_partition(&self, addr: &str, partition_id: PartitionId) -> RpcResult<()>;

    async fn update_partition(&self, addr: &str, space: &Space, partition_id: PartitionId) -> RpcResult<()>;

    /// Ask the group leader to add or remove a member.
    async fn change_member(
        &self,
        leader_addr: &str,
        partition_id: PartitionId,
        node_id: NodeId,
        op: MemberOp,
    ) -> RpcResult<()>;

    /// Destroy a removed replica's local storage.
    async fn delete_replica(&self, addr: &str, partition_id: PartitionId) -> RpcResult<()>;

    async fn partition_info(&self, addr: &str, partition_id: PartitionId, verbose: bool) -> RpcResult<PartitionStatus>;

    async fn get_engine_cfg(&self, addr: &str, partition_id: PartitionId) -> RpcResult<serde_json::Value>;

    async fn update_engine_cfg(
        &self,
        addr: &str,
        partition_id: PartitionId,
        cfg: &serde_json::Value,
    ) -> RpcResult<()>;

    async fn resource_limit(&self, addr: &str, partition_id: PartitionId, limits: &ResourceLimits) -> RpcResult<()>;

    async fn backup_space(&self, addr: &str, request: &BackupRequest, partition_id: PartitionId) -> RpcResult<()>;

    async fn server_stats(&self, addr: &str) -> RpcResult<ServerStats>;

    async fn is_live(&self, addr: &str) -> bool;
}
