//! Cluster-wide operations: engine config, resource limits, stats, store
//! membership, server registration, and health.

use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use vgrid_health::{ClusterInfo, SpaceInfo};
use vgrid_meta::{NodeId, Partition, PartitionId, Server, Space, StoreMember, keys};
use vgrid_rpc::{BackupRequest, ResourceLimits, ServerStats};

use crate::error::{MasterError, MasterResult};
use crate::service::MasterService;

impl MasterService {
    // ── Engine config ──────────────────────────────────────────────

    /// Stored engine config of a space, or the first replica's live config.
    pub async fn get_engine_cfg(&self, db_name: &str, space_name: &str) -> MasterResult<serde_json::Value> {
        let space = self.query_space(db_name, space_name).await?;
        if let Some(cfg) = self.meta.query_space_config(space.db_id, space.id).await? {
            return Ok(cfg);
        }
        let mut last_err = None;
        for (pid, addr) in self.replica_addrs(&space).await? {
            match self.client.get_engine_cfg(&addr, pid).await {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(partition_id = pid, %addr, error = %e, "engine config query failed");
                    last_err = Some(e);
                }
            }
        }
        match last_err {
            Some(e) => Err(e.into()),
            None => Err(MasterError::NotFound(format!("engine config of space {space_name}"))),
        }
    }

    /// Push `cfg` to every replica, then merge its non-null fields into
    /// the stored config.
    pub async fn modify_engine_cfg(
        &self,
        db_name: &str,
        space_name: &str,
        cfg: serde_json::Value,
    ) -> MasterResult<serde_json::Value> {
        let serde_json::Value::Object(changes) = &cfg else {
            return Err(MasterError::Validation("engine config must be a JSON object".to_string()));
        };
        let db = self.query_db(db_name).await?;
        let guard = self
            .lock(&keys::lock_space(&db.name, space_name), self.config.lock_ttl())
            .await?;
        let result: MasterResult<serde_json::Value> = async {
            let space = self.require_space_in(&db, space_name).await?;
            for (pid, addr) in self.replica_addrs(&space).await? {
                self.client.update_engine_cfg(&addr, pid, &cfg).await?;
            }
            let mut stored = self
                .meta
                .query_space_config(space.db_id, space.id)
                .await?
                .unwrap_or_else(|| serde_json::json!({}));
            if let serde_json::Value::Object(map) = &mut stored {
                for (k, v) in changes {
                    if !v.is_null() {
                        map.insert(k.clone(), v.clone());
                    }
                }
            }
            self.meta.put_space_config(space.db_id, space.id, &stored).await?;
            Ok(stored)
        }
        .await;
        self.unlock(guard).await;
        if result.is_ok() {
            info!(db = db_name, space = space_name, "engine config modified");
        }
        result
    }

    /// `(partition, address)` for every replica of every partition.
    async fn replica_addrs(&self, space: &Space) -> MasterResult<Vec<(PartitionId, String)>> {
        let mut addrs = Vec::new();
        for p in &space.partitions {
            for &node_id in &p.replicas {
                match self.meta.query_server(node_id).await? {
                    Some(server) => addrs.push((p.id, server.rpc_addr())),
                    None => warn!(partition_id = p.id, node_id, "replica server not registered"),
                }
            }
        }
        Ok(addrs)
    }

    // ── Resource limits ────────────────────────────────────────────

    /// Ask data nodes whether `limits` are exceeded.
    ///
    /// Scope is one space, every space of one db, or the whole cluster.
    /// Each space is checked on the first replica of its partitions.
    pub async fn resource_limit(
        &self,
        db_name: Option<&str>,
        space_name: Option<&str>,
        limits: &ResourceLimits,
    ) -> MasterResult<()> {
        let spaces = match (db_name, space_name) {
            (None, Some(_)) => {
                return Err(MasterError::Validation(
                    "a space name requires a db name".to_string(),
                ));
            }
            (Some(db), Some(space)) => vec![self.query_space(db, space).await?],
            (Some(db), None) => {
                let db = self.query_db(db).await?;
                self.meta.query_spaces(db.id).await?
            }
            (None, None) => self.meta.query_all_spaces().await?,
        };
        if spaces.is_empty() {
            return Err(MasterError::NotFound("no spaces to check".to_string()));
        }

        let mut checked = 0usize;
        for space in &spaces {
            for p in &space.partitions {
                let Some(&node_id) = p.replicas.first() else {
                    continue;
                };
                let Some(server) = self.meta.query_server(node_id).await? else {
                    continue;
                };
                self.client.resource_limit(&server.rpc_addr(), p.id, limits).await?;
                checked += 1;
            }
        }
        if checked == 0 {
            return Err(MasterError::NotFound("no reachable partitions to check".to_string()));
        }
        debug!(checked, "resource limits checked");
        Ok(())
    }

    // ── Backup ─────────────────────────────────────────────────────

    /// Forward a backup command to the leader of every partition.
    pub async fn backup_space(&self, request: &BackupRequest) -> MasterResult<()> {
        let space = self.query_space(&request.db_name, &request.space_name).await?;
        for p in &space.partitions {
            let record = self.meta.query_partition(p.id).await?.unwrap_or_else(|| p.clone());
            let node_id = match record.leader_id {
                0 => record.replicas.first().copied().unwrap_or(0),
                id => id,
            };
            let server = self.require_server(node_id).await?;
            self.client.backup_space(&server.rpc_addr(), request, p.id).await?;
        }
        info!(db = %request.db_name, space = %request.space_name, command = ?request.command, "backup dispatched");
        Ok(())
    }

    // ── Stats ──────────────────────────────────────────────────────

    /// Stats of every registered server, queried concurrently.
    ///
    /// A server that fails, or does not answer before the stats timeout,
    /// yields an entry with `error` set.
    pub async fn server_stats(&self) -> MasterResult<Vec<ServerStats>> {
        let servers = self.meta.query_servers().await?;
        let timeout = self.config.stats_timeout();
        let mut tasks = JoinSet::new();
        for server in &servers {
            let client = Arc::clone(&self.client);
            let addr = server.rpc_addr();
            tasks.spawn(async move {
                match tokio::time::timeout(timeout, client.server_stats(&addr)).await {
                    Ok(Ok(stats)) => stats,
                    Ok(Err(e)) => ServerStats::failed(&addr, e),
                    Err(_) => ServerStats::failed(&addr, "timed out"),
                }
            });
        }

        let mut stats = Vec::with_capacity(servers.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(s) => stats.push(s),
                Err(e) => return Err(MasterError::Internal(format!("stats task failed: {e}"))),
            }
        }
        stats.sort_by(|a, b| a.addr.cmp(&b.addr));
        Ok(stats)
    }

    // ── Store membership ───────────────────────────────────────────

    pub async fn members(&self) -> MasterResult<Vec<StoreMember>> {
        Ok(self.meta.store().member_list().await?)
    }

    pub async fn add_member(&self, name: &str, peer_urls: Vec<String>) -> MasterResult<StoreMember> {
        if peer_urls.is_empty() {
            return Err(MasterError::Validation("peer urls are required".to_string()));
        }
        let member = self.meta.store().member_add(name, peer_urls).await?;
        info!(member_id = member.id, name, "store member added");
        Ok(member)
    }

    /// Remove a store member by name. The last member cannot be removed.
    pub async fn remove_member(&self, name: &str) -> MasterResult<()> {
        let members = self.members().await?;
        let Some(member) = members.iter().find(|m| m.name == name) else {
            return Err(MasterError::NotFound(format!("store member {name}")));
        };
        if members.len() <= 1 {
            return Err(MasterError::Validation(format!(
                "{name} is the only store member"
            )));
        }
        if !self.meta.store().member_remove(member.id).await? {
            return Err(MasterError::NotFound(format!("store member {name}")));
        }
        info!(member_id = member.id, name, "store member removed");
        Ok(())
    }

    // ── Registration ───────────────────────────────────────────────

    /// Descriptor a data node starts from: every partition whose replica
    /// list contains `node_id`.
    pub async fn register_server(&self, ip: &str, node_id: NodeId) -> MasterResult<Server> {
        self.is_exist_node(node_id, ip).await?;
        let mut partition_ids = Vec::new();
        for space in self.meta.query_all_spaces().await? {
            partition_ids.extend(
                space
                    .partitions
                    .iter()
                    .filter(|p| p.has_replica(node_id))
                    .map(|p| p.id),
            );
        }
        partition_ids.sort_unstable();
        info!(%ip, node_id, partitions = partition_ids.len(), "server registering");
        Ok(Server {
            id: node_id,
            ip: ip.to_string(),
            host_ip: self.ps.host_ip.clone(),
            host_rack: self.ps.host_rack.clone(),
            host_zone: self.ps.host_zone.clone(),
            private: self.ps.private,
            resource_name: self.resource_name.clone(),
            rpc_port: self.ps.rpc_port,
            raft_heartbeat_port: self.ps.raft_heartbeat_port,
            raft_replicate_port: self.ps.raft_replicate_port,
            partition_ids,
            version: None,
        })
    }

    /// Persist a partition record reported by its hosting node.
    pub async fn register_partition(&self, partition: &Partition) -> MasterResult<()> {
        self.meta.put_partition(partition).await?;
        debug!(partition_id = partition.id, "partition registered");
        Ok(())
    }

    /// Fail if `node_id` is registered under an IP other than `ip`.
    pub async fn is_exist_node(&self, node_id: NodeId, ip: &str) -> MasterResult<()> {
        match self.meta.query_server(node_id).await? {
            Some(server) if server.ip != ip => Err(MasterError::Conflict(format!(
                "node {node_id} is registered on {}",
                server.ip
            ))),
            _ => Ok(()),
        }
    }

    // ── Health ─────────────────────────────────────────────────────

    pub async fn describe_cluster(
        &self,
        db_names: &[String],
        space_names: &[String],
        verbose: bool,
    ) -> MasterResult<ClusterInfo> {
        Ok(self.health.describe_cluster(db_names, space_names, verbose).await?)
    }

    pub async fn describe_space(&self, db_name: &str, space_name: &str, verbose: bool) -> MasterResult<SpaceInfo> {
        let space = self.query_space(db_name, space_name).await?;
        Ok(self.health.describe_space(&space, verbose).await?)
    }
}
