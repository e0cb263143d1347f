//! Replica membership orchestration.
//!
//! Ordering rules for a single change:
//!
//! - Add: CreatePartition on the new node, then ChangeMember on the leader.
//! - Remove: ChangeMember on the leader, then DeleteReplica on the removed
//!   node (skipped when that node is unreachable).
//!
//! The space record is written last.

use std::collections::BTreeMap;

use tracing::{error, info, warn};
use vgrid_meta::{
    MemberChange, MemberOp, NodeId, Partition, PartitionId, Server, Space, keys,
};
use vgrid_placement::{ServerLoad, plan_replica_change};

use crate::error::{MasterError, MasterResult};
use crate::service::MasterService;

impl MasterService {
    /// Add or remove one replica of one partition.
    ///
    /// Holds the space lock from the first read of the space record until
    /// it is written back.
    pub async fn change_member(
        &self,
        partition_id: PartitionId,
        node_id: NodeId,
        op: MemberOp,
    ) -> MasterResult<Space> {
        let partition = self
            .meta
            .query_partition(partition_id)
            .await?
            .ok_or_else(|| MasterError::NotFound(format!("partition {partition_id}")))?;
        let space = self.owning_space(&partition).await?;
        let db = self
            .meta
            .query_db(space.db_id)
            .await?
            .ok_or_else(|| MasterError::NotFound(format!("db {}", space.db_id)))?;

        let guard = self
            .lock(&keys::lock_space(&db.name, &space.name), self.config.lock_ttl())
            .await?;
        let result = self.change_member_locked(&partition, &space.name, node_id, op).await;
        self.unlock(guard).await;
        result
    }

    async fn owning_space(&self, partition: &Partition) -> MasterResult<Space> {
        self.meta
            .query_space(partition.db_id, partition.space_id)
            .await?
            .ok_or_else(|| {
                MasterError::NotFound(format!("space {} of partition {}", partition.space_id, partition.id))
            })
    }

    async fn change_member_locked(
        &self,
        partition: &Partition,
        locked_name: &str,
        node_id: NodeId,
        op: MemberOp,
    ) -> MasterResult<Space> {
        let partition_id = partition.id;
        let mut space = self.owning_space(partition).await?;
        if space.name != locked_name {
            return Err(MasterError::Conflict(format!(
                "space {locked_name} was renamed to {} during the change",
                space.name
            )));
        }
        let listed = space.partition_mut(partition_id).ok_or_else(|| {
            MasterError::Conflict(format!("space {} does not list partition {partition_id}", partition.space_id))
        })?;

        match op {
            MemberOp::Add => {
                if listed.has_replica(node_id) {
                    return Err(MasterError::Validation(format!(
                        "partition {partition_id} already has a replica on server {node_id}"
                    )));
                }
                listed.replicas.push(node_id);
            }
            MemberOp::Remove => listed.replicas.retain(|id| *id != node_id),
        }

        let leader = self.resolve_leader(partition_id).await?;
        let target = self.meta.query_server(node_id).await?;

        match op {
            MemberOp::Add => {
                let target = target.ok_or_else(|| MasterError::NotFound(format!("server {node_id}")))?;
                self.client
                    .create_partition(&target.rpc_addr(), &space, partition_id)
                    .await?;
                self.client
                    .change_member(&leader.rpc_addr(), partition_id, node_id, op)
                    .await?;
            }
            MemberOp::Remove => {
                self.client
                    .change_member(&leader.rpc_addr(), partition_id, node_id, op)
                    .await?;
                match target {
                    Some(target) if self.client.is_live(&target.rpc_addr()).await => {
                        self.client
                            .delete_replica(&target.rpc_addr(), partition_id)
                            .await?;
                    }
                    _ => warn!(partition_id, node_id, "removed replica is unreachable, local data left in place"),
                }
            }
        }

        self.persist_space(&mut space).await?;
        info!(partition_id, node_id, ?op, space = %space.name, "partition member changed");
        Ok(space)
    }

    /// Apply the same change to several partitions, stopping at the first failure.
    pub async fn change_members(
        &self,
        partition_ids: &[PartitionId],
        node_id: NodeId,
        op: MemberOp,
    ) -> MasterResult<()> {
        for &pid in partition_ids {
            self.change_member(pid, node_id, op).await?;
        }
        Ok(())
    }

    /// Find a live leader for a partition, re-reading the record between tries.
    async fn resolve_leader(&self, partition_id: PartitionId) -> MasterResult<Server> {
        let attempts = self.config.leader_retry_times.max(1);
        for attempt in 1..=attempts {
            let partition = self
                .meta
                .query_partition(partition_id)
                .await?
                .ok_or_else(|| MasterError::NotFound(format!("partition {partition_id}")))?;
            if partition.leader_id != 0 {
                if let Some(server) = self.meta.query_server(partition.leader_id).await? {
                    if self.client.is_live(&server.rpc_addr()).await {
                        return Ok(server);
                    }
                }
            }
            warn!(partition_id, leader = partition.leader_id, attempt, "no live leader yet");
            if attempt < attempts {
                tokio::time::sleep(self.config.leader_retry_backoff()).await;
            }
        }
        Err(MasterError::UpstreamUnavailable(format!(
            "partition {partition_id} has no live leader after {attempts} attempts"
        )))
    }

    // ── Bulk replica count ─────────────────────────────────────────

    /// Add or remove one replica of every partition of a space, then
    /// update its `replica_num`.
    ///
    /// Changes run one at a time. If one fails the remaining changes are
    /// skipped and [`MasterError::ChangeReplicaAborted`] reports what was
    /// applied; `replica_num` is left unchanged. Re-running the call plans
    /// only the partitions not yet at the target count.
    pub async fn change_replica(
        &self,
        db_name: &str,
        space_name: &str,
        op: MemberOp,
    ) -> MasterResult<Space> {
        let db = self.query_db(db_name).await?;
        let space = self.require_space_in(&db, space_name).await?;
        let target = match op {
            MemberOp::Add => usize::from(space.replica_num) + 1,
            MemberOp::Remove if space.replica_num <= 1 => {
                return Err(MasterError::Validation(format!(
                    "space {space_name} already has a single replica"
                )));
            }
            MemberOp::Remove => usize::from(space.replica_num) - 1,
        };

        let servers = self.db_servers(db_name).await?;
        let load = self.server_loads(&servers).await?;
        let partitions = self.current_partitions(&space).await?;
        let changes = plan_replica_change(load, &partitions, op, target)?;
        info!(space = %space.name, ?op, changes = changes.len(), "replica change planned");

        let mut applied: Vec<MemberChange> = Vec::with_capacity(changes.len());
        for change in changes {
            if let Err(e) = self.change_member(change.partition_id, change.node_id, change.op).await {
                error!(
                    partition_id = change.partition_id,
                    node_id = change.node_id,
                    applied = applied.len(),
                    error = %e,
                    "replica change aborted, operator attention required"
                );
                return Err(MasterError::ChangeReplicaAborted {
                    applied,
                    reason: e.to_string(),
                });
            }
            if change.op == MemberOp::Remove {
                tokio::time::sleep(self.ps.remove_cooldown()).await;
            }
            applied.push(change);
        }

        let lock_key = keys::lock_space(&db.name, space_name);
        let guard = self.lock(&lock_key, self.config.lock_ttl()).await?;
        let result: MasterResult<Space> = async {
            let mut space = self.require_space_in(&db, space_name).await?;
            space.replica_num = u8::try_from(target)
                .map_err(|_| MasterError::Validation(format!("replica count {target} is too large")))?;
            self.persist_space(&mut space).await?;
            Ok(space)
        }
        .await;
        self.unlock(guard).await;
        if let Ok(space) = &result {
            info!(space = %space.name, replica_num = space.replica_num, "replica count changed");
        }
        result
    }

    /// Hosted-partition counts for `servers`, taken from every space record.
    async fn server_loads(&self, servers: &[Server]) -> MasterResult<Vec<ServerLoad>> {
        let mut hosted: BTreeMap<NodeId, Vec<PartitionId>> =
            servers.iter().map(|s| (s.id, Vec::new())).collect();
        for space in self.meta.query_all_spaces().await? {
            for p in &space.partitions {
                for node_id in &p.replicas {
                    if let Some(list) = hosted.get_mut(node_id) {
                        list.push(p.id);
                    }
                }
            }
        }
        Ok(hosted
            .into_iter()
            .map(|(node_id, partition_ids)| ServerLoad { node_id, partition_ids })
            .collect())
    }

    /// Partitions of a space as currently recorded by their hosting nodes.
    async fn current_partitions(&self, space: &Space) -> MasterResult<Vec<Partition>> {
        let mut partitions = Vec::with_capacity(space.partitions.len());
        for listed in &space.partitions {
            let record = self.meta.query_partition(listed.id).await?;
            partitions.push(record.unwrap_or_else(|| listed.clone()));
        }
        Ok(partitions)
    }

    // ── Failed servers ─────────────────────────────────────────────

    /// Move every partition of a failed server to `new_addr`.
    ///
    /// Each partition gains the new replica before losing the failed one.
    /// The worklist entry is removed once every partition has moved.
    pub async fn recover_fail_server(&self, failed_addr: &str, new_addr: &str) -> MasterResult<()> {
        let failed = self
            .meta
            .query_fail_servers()
            .await?
            .into_iter()
            .find(|fs| fs.node.ip == failed_addr || fs.node.rpc_addr() == failed_addr)
            .ok_or_else(|| MasterError::NotFound(format!("failed server {failed_addr}")))?;
        let replacement = self
            .meta
            .query_server_by_addr(new_addr)
            .await?
            .ok_or_else(|| MasterError::NotFound(format!("server {new_addr}")))?;
        if replacement.id == failed.id {
            return Err(MasterError::Validation(format!(
                "server {new_addr} is the failed server itself"
            )));
        }

        for &pid in &failed.node.partition_ids {
            let Some(partition) = self.meta.query_partition(pid).await? else {
                warn!(partition_id = pid, "partition of failed server no longer exists");
                continue;
            };
            if !partition.has_replica(replacement.id) {
                self.change_member(pid, replacement.id, MemberOp::Add).await?;
            }
            self.change_member(pid, failed.id, MemberOp::Remove).await?;
            info!(partition_id = pid, from = failed.id, to = replacement.id, "partition moved off failed server");
        }

        self.meta.delete_fail_server(failed.id).await?;
        info!(failed = failed.id, replacement = replacement.id, "failed server recovered");
        Ok(())
    }
}
