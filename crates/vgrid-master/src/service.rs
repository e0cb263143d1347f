//! MasterService: the control-plane handle.
//!
//! Bundles the metadata client, the partition-server client, and the
//! configuration every admin operation needs. Operations are implemented
//! across the sibling modules as `impl MasterService` blocks.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, warn};
use vgrid_core::{MasterConfig, PsConfig, VgridConfig};
use vgrid_health::HealthAggregator;
use vgrid_meta::{
    Db, DbId, LockGuard, MetaClient, NodeId, Partition, Server, Space, keys,
};
use vgrid_placement::{Planner, eligible_servers, replica_load, to_candidates};
use vgrid_rpc::PartitionServerClient;

use crate::error::{MasterError, MasterResult};
use crate::principal::RoleCache;

pub struct MasterService {
    pub(crate) meta: MetaClient,
    pub(crate) client: Arc<dyn PartitionServerClient>,
    pub(crate) health: HealthAggregator,
    pub(crate) roles: RoleCache,
    pub(crate) config: MasterConfig,
    pub(crate) ps: PsConfig,
    pub(crate) resource_name: String,
    shutdown: watch::Receiver<bool>,
}

impl MasterService {
    pub fn new(meta: MetaClient, client: Arc<dyn PartitionServerClient>, config: &VgridConfig) -> Self {
        let (_tx, shutdown) = watch::channel(false);
        Self {
            health: HealthAggregator::new(meta.clone(), Arc::clone(&client)),
            roles: RoleCache::new(),
            meta,
            client,
            config: config.master.clone(),
            ps: config.ps.clone(),
            resource_name: config.global.resource_name.clone(),
            shutdown,
        }
    }

    /// Cancel in-flight readiness waits when the receiver flips to `true`.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn meta(&self) -> &MetaClient {
        &self.meta
    }

    pub fn client(&self) -> &Arc<dyn PartitionServerClient> {
        &self.client
    }

    pub(crate) fn cancelled(&self) -> bool {
        *self.shutdown.borrow()
    }

    // ── Locks ──────────────────────────────────────────────────────

    /// Blocking acquire of a named lock held for at most `ttl`.
    pub(crate) async fn lock(&self, key: &str, ttl: std::time::Duration) -> MasterResult<LockGuard> {
        Ok(self.meta.locks().acquire(key, ttl, ttl).await?)
    }

    pub(crate) async fn unlock(&self, guard: LockGuard) {
        let key = guard.key().to_string();
        if let Err(e) = guard.release().await {
            warn!(%key, error = %e, "failed to release lock");
        }
    }

    // ── Lookups ────────────────────────────────────────────────────

    /// Resolve a database by name, or by numeric id.
    pub async fn query_db(&self, name_or_id: &str) -> MasterResult<Db> {
        if let Some(db) = self.meta.query_db_by_name(name_or_id).await? {
            return Ok(db);
        }
        if let Ok(id) = name_or_id.parse::<DbId>() {
            if let Some(db) = self.meta.query_db(id).await? {
                return Ok(db);
            }
        }
        Err(MasterError::NotFound(format!("db {name_or_id}")))
    }

    pub async fn query_space(&self, db_name: &str, space_name: &str) -> MasterResult<Space> {
        let db = self.query_db(db_name).await?;
        self.meta
            .query_space_by_name(db.id, space_name)
            .await?
            .ok_or_else(|| MasterError::NotFound(format!("space {db_name}/{space_name}")))
    }

    pub(crate) async fn require_server(&self, node_id: NodeId) -> MasterResult<Server> {
        self.meta
            .query_server(node_id)
            .await?
            .ok_or_else(|| MasterError::NotFound(format!("server {node_id}")))
    }

    // ── Persistence ────────────────────────────────────────────────

    /// Write a space back, bumping its version.
    ///
    /// Without a partition rule `partition_num` tracks the partition list.
    pub(crate) async fn persist_space(&self, space: &mut Space) -> MasterResult<()> {
        space.version += 1;
        if space.partition_rule.is_none() {
            space.partition_num = space.partitions.len() as u32;
        }
        self.meta.put_space(space).await?;
        debug!(space = %space.name, version = space.version, "space persisted");
        Ok(())
    }

    /// Remove the records of partitions whose creation did not complete.
    pub(crate) async fn forget_partitions(&self, partitions: &[Partition]) {
        for p in partitions {
            if let Err(e) = self.meta.delete_partition(p.id).await {
                warn!(partition_id = p.id, error = %e, "failed to delete partition record");
            }
        }
    }

    pub(crate) async fn delete_space_record(&self, space: &Space) {
        if let Err(e) = self.meta.store().delete(&keys::space(space.db_id, space.id)).await {
            warn!(space = %space.name, error = %e, "failed to delete space record");
        }
    }

    // ── Placement ──────────────────────────────────────────────────

    /// Choose replicas for every partition in `partitions`.
    ///
    /// Load is recomputed from the store for this batch; nothing is written
    /// when any partition cannot be placed.
    pub(crate) async fn place_partitions(
        &self,
        db: &Db,
        resource_name: &str,
        partitions: &mut [Partition],
        replica_num: u8,
    ) -> MasterResult<()> {
        let servers = self.meta.query_servers().await?;
        let eligible = eligible_servers(&servers, db, resource_name);
        if eligible.is_empty() {
            return Err(MasterError::Capacity(format!(
                "no servers available for db {} resource {resource_name}",
                db.name
            )));
        }

        let load = replica_load(&self.meta.query_all_spaces().await?);
        let live = self.probe_live(&eligible).await;
        let candidates = to_candidates(&eligible, &load, &live, self.ps.replica_anti_affinity);

        let ids: Vec<_> = partitions.iter().map(|p| p.id).collect();
        let plan = Planner::new(candidates).plan_batch(&ids, usize::from(replica_num))?;
        for p in partitions.iter_mut() {
            if let Some(assignment) = plan.get(&p.id) {
                p.replicas = assignment.node_ids.clone();
            }
        }
        Ok(())
    }

    /// Liveness probe for every server, run concurrently.
    pub(crate) async fn probe_live(&self, servers: &[&Server]) -> HashSet<NodeId> {
        let mut probes = JoinSet::new();
        for s in servers {
            let client = Arc::clone(&self.client);
            let addr = s.rpc_addr();
            let id = s.id;
            probes.spawn(async move { (id, client.is_live(&addr).await) });
        }
        let mut live = HashSet::new();
        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok((id, true)) => {
                    live.insert(id);
                }
                Ok((id, false)) => debug!(node_id = id, "server failed liveness probe"),
                Err(e) => warn!(error = %e, "liveness probe task failed"),
            }
        }
        live
    }
}
