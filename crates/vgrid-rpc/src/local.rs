//! LocalDataPlane: in-process stand-in for a fleet of partition servers.
//!
//! Each simulated node is addressed by its `ip:port` and behaves like a
//! real data node towards the metadata store: creating a partition writes
//! the partition record if it is absent, and membership changes sent to a
//! leader update that record. Every RPC is appended to an ordered call log,
//! and failures can be injected per method and address.
//!
//! Used by integration tests and by the daemon's standalone mode.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::{debug, warn};
use vgrid_meta::{MemberOp, MetaClient, NodeId, Partition, PartitionId, ReplicaStatus, Space};

use crate::client::PartitionServerClient;
use crate::error::{RpcError, RpcResult};
use crate::types::*;

/// RPC methods, for fault injection and call-log filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcMethod {
    CreatePartition,
    DeletePartition,
    UpdatePartition,
    ChangeMember,
    DeleteReplica,
    PartitionInfo,
    GetEngineCfg,
    UpdateEngineCfg,
    ResourceLimit,
    BackupSpace,
    ServerStats,
}

/// One recorded RPC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcCall {
    pub method: RpcMethod,
    pub addr: String,
    pub partition_id: Option<PartitionId>,
    /// Member affected by a `ChangeMember` call.
    pub node_id: Option<NodeId>,
    pub op: Option<MemberOp>,
}

#[derive(Debug)]
struct LocalNode {
    node_id: NodeId,
    live: bool,
    partitions: BTreeSet<PartitionId>,
    engine_cfg: HashMap<PartitionId, serde_json::Value>,
    data_dir: Option<PathBuf>,
}

#[derive(Default)]
struct PlaneState {
    nodes: BTreeMap<String, LocalNode>,
    calls: Vec<RpcCall>,
    faults: HashMap<(RpcMethod, String), String>,
    /// Partitions whose creation never reports back to the store.
    silent: bool,
}

#[derive(Clone)]
pub struct LocalDataPlane {
    meta: MetaClient,
    state: Arc<Mutex<PlaneState>>,
}

impl LocalDataPlane {
    pub fn new(meta: MetaClient) -> Self {
        Self {
            meta,
            state: Arc::new(Mutex::new(PlaneState::default())),
        }
    }

    fn state(&self) -> MutexGuard<'_, PlaneState> {
        // A poisoned plane only happens after a test already panicked.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a live node at `addr`.
    pub fn add_node(&self, node_id: NodeId, addr: &str) {
        self.state().nodes.insert(
            addr.to_string(),
            LocalNode {
                node_id,
                live: true,
                partitions: BTreeSet::new(),
                engine_cfg: HashMap::new(),
                data_dir: None,
            },
        );
    }

    /// Add a node that materializes partitions as `{data_dir}/{partition_id}`.
    pub fn add_node_with_dir(&self, node_id: NodeId, addr: &str, data_dir: PathBuf) {
        self.add_node(node_id, addr);
        if let Some(node) = self.state().nodes.get_mut(addr) {
            node.data_dir = Some(data_dir);
        }
    }

    pub fn set_live(&self, addr: &str, live: bool) {
        if let Some(node) = self.state().nodes.get_mut(addr) {
            node.live = live;
        }
    }

    /// Make every future `method` call to `addr` fail with `message`.
    pub fn inject_failure(&self, method: RpcMethod, addr: &str, message: &str) {
        self.state()
            .faults
            .insert((method, addr.to_string()), message.to_string());
    }

    pub fn clear_failures(&self) {
        self.state().faults.clear();
    }

    /// When set, CreatePartition succeeds but never writes the partition record.
    pub fn set_silent(&self, silent: bool) {
        self.state().silent = silent;
    }

    pub fn calls(&self) -> Vec<RpcCall> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn hosted_partitions(&self, addr: &str) -> Vec<PartitionId> {
        self.state()
            .nodes
            .get(addr)
            .map(|n| n.partitions.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Record the call, then fail if the node is down or a fault is armed.
    fn enter(
        &self,
        method: RpcMethod,
        addr: &str,
        partition_id: Option<PartitionId>,
        member: Option<(NodeId, MemberOp)>,
    ) -> RpcResult<NodeId> {
        let mut state = self.state();
        state.calls.push(RpcCall {
            method,
            addr: addr.to_string(),
            partition_id,
            node_id: member.map(|m| m.0),
            op: member.map(|m| m.1),
        });
        let node_id = match state.nodes.get(addr) {
            Some(node) if node.live => node.node_id,
            Some(_) => return Err(RpcError::unreachable(addr, "node is down")),
            None => return Err(RpcError::unreachable(addr, "no such node")),
        };
        if let Some(message) = state.faults.get(&(method, addr.to_string())) {
            return Err(RpcError::Remote {
                addr: addr.to_string(),
                code: 1,
                message: message.clone(),
            });
        }
        Ok(node_id)
    }

    fn live_node_ids(&self) -> BTreeSet<NodeId> {
        self.state()
            .nodes
            .values()
            .filter(|n| n.live)
            .map(|n| n.node_id)
            .collect()
    }

    fn host(&self, addr: &str, partition_id: PartitionId) -> RpcResult<()> {
        let dir = {
            let mut state = self.state();
            let Some(node) = state.nodes.get_mut(addr) else {
                return Err(RpcError::unreachable(addr, "no such node"));
            };
            node.partitions.insert(partition_id);
            node.data_dir.as_ref().map(|d| d.join(partition_id.to_string()))
        };
        if let Some(dir) = dir {
            std::fs::create_dir_all(&dir).map_err(|e| RpcError::Remote {
                addr: addr.to_string(),
                code: 2,
                message: e.to_string(),
            })?;
        }
        Ok(())
    }

    fn unhost(&self, addr: &str, partition_id: PartitionId) {
        let dir = {
            let mut state = self.state();
            let Some(node) = state.nodes.get_mut(addr) else {
                return;
            };
            node.partitions.remove(&partition_id);
            node.engine_cfg.remove(&partition_id);
            node.data_dir.as_ref().map(|d| d.join(partition_id.to_string()))
        };
        if let Some(dir) = dir {
            if let Err(e) = std::fs::remove_dir_all(&dir) {
                debug!(?dir, error = %e, "partition directory already gone");
            }
        }
    }
}

#[async_trait]
impl PartitionServerClient for LocalDataPlane {
    async fn create_partition(&self, addr: &str, space: &Space, partition_id: PartitionId) -> RpcResult<()> {
        self.enter(RpcMethod::CreatePartition, addr, Some(partition_id), None)?;
        self.host(addr, partition_id)?;
        if self.state().silent {
            return Ok(());
        }
        if self.meta.query_partition(partition_id).await?.is_some() {
            return Ok(());
        }
        let Some(planned) = space.partition(partition_id) else {
            warn!(partition_id, space = %space.name, "create for a partition the space does not list");
            return Ok(());
        };
        let mut record = planned.clone();
        record.leader_id = record.replicas.first().copied().unwrap_or(0);
        record.replica_status = record
            .replicas
            .iter()
            .map(|id| (*id, ReplicaStatus::Ok))
            .collect();
        self.meta.put_partition(&record).await?;
        debug!(partition_id, %addr, "partition registered");
        Ok(())
    }

    async fn delete_partition(&self, addr: &str, partition_id: PartitionId) -> RpcResult<()> {
        self.enter(RpcMethod::DeletePartition, addr, Some(partition_id), None)?;
        self.unhost(addr, partition_id);
        Ok(())
    }

    async fn update_partition(&self, addr: &str, _space: &Space, partition_id: PartitionId) -> RpcResult<()> {
        self.enter(RpcMethod::UpdatePartition, addr, Some(partition_id), None)?;
        Ok(())
    }

    async fn change_member(
        &self,
        leader_addr: &str,
        partition_id: PartitionId,
        node_id: NodeId,
        op: MemberOp,
    ) -> RpcResult<()> {
        self.enter(
            RpcMethod::ChangeMember,
            leader_addr,
            Some(partition_id),
            Some((node_id, op)),
        )?;
        let Some(mut record) = self.meta.query_partition(partition_id).await? else {
            return Err(RpcError::Remote {
                addr: leader_addr.to_string(),
                code: 3,
                message: format!("partition {partition_id} not found"),
            });
        };
        match op {
            MemberOp::Add => {
                if !record.replicas.contains(&node_id) {
                    record.replicas.push(node_id);
                }
                record.replica_status.insert(node_id, ReplicaStatus::Ok);
            }
            MemberOp::Remove => {
                record.replicas.retain(|id| *id != node_id);
                record.replica_status.remove(&node_id);
                if record.leader_id == node_id {
                    record.leader_id = record.replicas.first().copied().unwrap_or(0);
                }
            }
        }
        self.meta.put_partition(&record).await?;
        Ok(())
    }

    async fn delete_replica(&self, addr: &str, partition_id: PartitionId) -> RpcResult<()> {
        self.enter(RpcMethod::DeleteReplica, addr, Some(partition_id), None)?;
        self.unhost(addr, partition_id);
        Ok(())
    }

    async fn partition_info(&self, addr: &str, partition_id: PartitionId, _verbose: bool) -> RpcResult<PartitionStatus> {
        self.enter(RpcMethod::PartitionInfo, addr, Some(partition_id), None)?;
        let Some(record) = self.meta.query_partition(partition_id).await? else {
            return Err(RpcError::Remote {
                addr: addr.to_string(),
                code: 3,
                message: format!("partition {partition_id} not found"),
            });
        };
        Ok(status_of(&record, &self.live_node_ids()))
    }

    async fn get_engine_cfg(&self, addr: &str, partition_id: PartitionId) -> RpcResult<serde_json::Value> {
        self.enter(RpcMethod::GetEngineCfg, addr, Some(partition_id), None)?;
        let cfg = self
            .state()
            .nodes
            .get(addr)
            .and_then(|n| n.engine_cfg.get(&partition_id).cloned())
            .unwrap_or_else(|| serde_json::json!({}));
        Ok(cfg)
    }

    async fn update_engine_cfg(
        &self,
        addr: &str,
        partition_id: PartitionId,
        cfg: &serde_json::Value,
    ) -> RpcResult<()> {
        self.enter(RpcMethod::UpdateEngineCfg, addr, Some(partition_id), None)?;
        if let Some(node) = self.state().nodes.get_mut(addr) {
            node.engine_cfg.insert(partition_id, cfg.clone());
        }
        Ok(())
    }

    async fn resource_limit(&self, addr: &str, partition_id: PartitionId, _limits: &ResourceLimits) -> RpcResult<()> {
        self.enter(RpcMethod::ResourceLimit, addr, Some(partition_id), None)?;
        Ok(())
    }

    async fn backup_space(&self, addr: &str, _request: &BackupRequest, partition_id: PartitionId) -> RpcResult<()> {
        self.enter(RpcMethod::BackupSpace, addr, Some(partition_id), None)?;
        Ok(())
    }

    async fn server_stats(&self, addr: &str) -> RpcResult<ServerStats> {
        let node_id = self.enter(RpcMethod::ServerStats, addr, None, None)?;
        Ok(ServerStats {
            addr: addr.to_string(),
            node_id,
            partition_ids: self.hosted_partitions(addr),
            ..ServerStats::default()
        })
    }

    async fn is_live(&self, addr: &str) -> bool {
        self.state().nodes.get(addr).is_some_and(|n| n.live)
    }
}

/// Status a leader would report for `record` given which nodes are up.
fn status_of(record: &Partition, live: &BTreeSet<NodeId>) -> PartitionStatus {
    let leader_live = record.leader_id != 0 && live.contains(&record.leader_id);
    let raft = leader_live.then(|| RaftStatus {
        leader: record.leader_id,
        term: 1,
        replicas: record
            .replicas
            .iter()
            .map(|id| {
                let state = if *id == record.leader_id {
                    ReplicaState::Probe
                } else {
                    ReplicaState::Replicate
                };
                (*id, state)
            })
            .collect(),
    });
    PartitionStatus {
        partition_id: record.id,
        raft,
        unreachable: record
            .replicas
            .iter()
            .copied()
            .filter(|id| !live.contains(id))
            .collect(),
        doc_num: 0,
        error: None,
    }
}
