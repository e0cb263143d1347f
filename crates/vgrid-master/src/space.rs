//! Space lifecycle: create, update, delete.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use vgrid_meta::{
    Db, DbId, Field, NodeId, Partition, PartitionId, Space, keys, merge_schema, to_json,
};
use vgrid_placement::assign_slots;

use crate::error::{MasterError, MasterResult};
use crate::service::MasterService;

/// Mutable attributes of a space. `None` leaves the attribute as is.
///
/// `partition_num`, `replica_num`, and `db_id` are accepted only when they
/// match the current value; they change through their own operations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpaceUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub fields: Option<Vec<Field>>,
    #[serde(default)]
    pub partition_num: Option<u32>,
    #[serde(default)]
    pub replica_num: Option<u8>,
    #[serde(default)]
    pub db_id: Option<DbId>,
}

impl MasterService {
    // ── Create ─────────────────────────────────────────────────────

    /// Create a space in `db_name`.
    ///
    /// `space` carries the caller's definition; ids, partitions, slots, and
    /// replica sets are filled in here. The returned space is enabled.
    pub async fn create_space(&self, db_name: &str, mut space: Space) -> MasterResult<Space> {
        space.validate().map_err(MasterError::Validation)?;
        let db = self.query_db(db_name).await?;
        if space.resource_name.is_empty() {
            space.resource_name = self.resource_name.clone();
        }

        let guard = self
            .lock(&keys::lock_space(&db.name, &space.name), self.config.lock_ttl())
            .await?;
        let result = self.create_space_locked(&db, space).await;
        self.unlock(guard).await;
        result
    }

    async fn create_space_locked(&self, db: &Db, mut space: Space) -> MasterResult<Space> {
        if let Some(existing) = self.meta.query_space_by_name(db.id, &space.name).await? {
            return Err(if existing.enabled {
                MasterError::AlreadyExists(format!("space {}/{}", db.name, space.name))
            } else {
                MasterError::Conflict(format!(
                    "space {}/{} is left disabled by an earlier failed creation",
                    db.name, space.name
                ))
            });
        }

        space.id = self.meta.new_id(keys::SEQ_SPACE, self.config.id_timeout()).await?;
        space.db_id = db.id;
        space.enabled = false;
        space.version = 0;

        let labels: Vec<Option<String>> = match &mut space.partition_rule {
            Some(rule) => {
                rule.partitions = rule.range_count();
                rule.ranges.iter().map(|r| Some(r.name.clone())).collect()
            }
            None => vec![None],
        };
        space.partitions = self.allocate_partitions(&space, &labels).await?;
        assign_slots(&mut space.partitions);

        let (replica_num, resource_name) = (space.replica_num, space.resource_name.clone());
        self.place_partitions(db, &resource_name, &mut space.partitions, replica_num)
            .await?;

        self.meta
            .store()
            .create(&keys::space(db.id, space.id), &to_json(&space)?)
            .await?;
        info!(db = %db.name, space = %space.name, space_id = space.id, partitions = space.partitions.len(), "space registered, creating partitions");

        let pids: Vec<PartitionId> = space.partitions.iter().map(|p| p.id).collect();
        if let Err(e) = self.create_partitions_and_wait(&space, &pids).await {
            error!(db = %db.name, space = %space.name, error = %e, "space creation failed, removing metadata");
            self.delete_space_record(&space).await;
            self.forget_partitions(&space.partitions).await;
            return Err(e);
        }

        space.enabled = true;
        self.persist_space(&mut space).await?;
        info!(db = %db.name, space = %space.name, space_id = space.id, "space created");
        Ok(space)
    }

    /// Allocate `partition_num` new partitions for every label.
    pub(crate) async fn allocate_partitions(
        &self,
        space: &Space,
        labels: &[Option<String>],
    ) -> MasterResult<Vec<Partition>> {
        let mut partitions = Vec::with_capacity(labels.len() * space.partition_num as usize);
        for label in labels {
            for _ in 0..space.partition_num {
                let mut p = Partition::new(self.new_partition_id().await?, space.id, space.db_id);
                p.name = label.clone();
                partitions.push(p);
            }
        }
        Ok(partitions)
    }

    pub(crate) async fn new_partition_id(&self) -> MasterResult<PartitionId> {
        let id = self
            .meta
            .new_id(keys::SEQ_PARTITION, self.config.id_timeout())
            .await?;
        PartitionId::try_from(id)
            .map_err(|_| MasterError::Internal(format!("partition id sequence exhausted at {id}")))
    }

    // ── Update ─────────────────────────────────────────────────────

    /// Apply a non-structural update and push it to every partition leader.
    pub async fn update_space(
        &self,
        db_name: &str,
        space_name: &str,
        update: SpaceUpdate,
    ) -> MasterResult<Space> {
        let db = self.query_db(db_name).await?;
        let guard = self
            .lock(&keys::lock_space(&db.name, space_name), self.config.lock_ttl())
            .await?;
        let result = self.update_space_locked(&db, space_name, update).await;
        self.unlock(guard).await;
        result
    }

    async fn update_space_locked(
        &self,
        db: &Db,
        space_name: &str,
        update: SpaceUpdate,
    ) -> MasterResult<Space> {
        let mut space = self.require_space_in(db, space_name).await?;

        if update.db_id.is_some_and(|v| v != space.db_id) {
            return Err(MasterError::Validation("db_id cannot be changed".to_string()));
        }
        if update.partition_num.is_some_and(|v| v != space.partition_num) {
            return Err(MasterError::Validation(
                "partition_num cannot be changed by update, scale the space instead".to_string(),
            ));
        }
        if update.replica_num.is_some_and(|v| v != space.replica_num) {
            return Err(MasterError::Validation(
                "replica_num cannot be changed by update, change the replica count instead".to_string(),
            ));
        }

        if let Some(fields) = &update.fields {
            space.fields = merge_schema(&space.fields, fields).map_err(MasterError::Validation)?;
        }
        if let Some(name) = update.name.filter(|n| *n != space.name) {
            if self.meta.query_space_by_name(db.id, &name).await?.is_some() {
                return Err(MasterError::AlreadyExists(format!("space {}/{name}", db.name)));
            }
            space.name = name;
            space.validate().map_err(MasterError::Validation)?;
        }
        if let Some(enabled) = update.enabled {
            space.enabled = enabled;
        }

        let leaders = self.partition_leaders(&space).await?;
        for (pid, addr) in &leaders {
            if !self.client.is_live(addr).await {
                return Err(MasterError::UpstreamUnavailable(format!(
                    "leader {addr} of partition {pid} is not reachable"
                )));
            }
        }

        space.version += 1;
        for (pid, addr) in &leaders {
            self.client.update_partition(addr, &space, *pid).await?;
        }
        space.version -= 1;
        self.persist_space(&mut space).await?;
        info!(db = %db.name, space = %space.name, version = space.version, "space updated");
        Ok(space)
    }

    /// Leader address of every partition, falling back to the first replica.
    async fn partition_leaders(&self, space: &Space) -> MasterResult<Vec<(PartitionId, String)>> {
        let mut leaders = Vec::with_capacity(space.partitions.len());
        for listed in &space.partitions {
            let record = self
                .meta
                .query_partition(listed.id)
                .await?
                .unwrap_or_else(|| listed.clone());
            let node_id: NodeId = match record.leader_id {
                0 => record.replicas.first().copied().unwrap_or(0),
                id => id,
            };
            let server = self.meta.query_server(node_id).await?.ok_or_else(|| {
                MasterError::UpstreamUnavailable(format!(
                    "no registered leader for partition {}",
                    listed.id
                ))
            })?;
            leaders.push((listed.id, server.rpc_addr()));
        }
        Ok(leaders)
    }

    // ── Delete ─────────────────────────────────────────────────────

    /// Delete a space, its partitions, its aliases, and its engine config.
    ///
    /// Deleting a space that does not exist succeeds.
    pub async fn delete_space(&self, db_name: &str, space_name: &str) -> MasterResult<()> {
        let db = self.query_db(db_name).await?;
        let guard = self
            .lock(&keys::lock_space(&db.name, space_name), self.config.light_lock_ttl())
            .await?;
        let result = self.delete_space_locked(&db, space_name).await;
        self.unlock(guard).await;
        result
    }

    async fn delete_space_locked(&self, db: &Db, space_name: &str) -> MasterResult<()> {
        let Some(space) = self.meta.query_space_by_name(db.id, space_name).await? else {
            info!(db = %db.name, space = space_name, "space already absent");
            return Ok(());
        };

        self.meta.store().delete(&keys::space(db.id, space.id)).await?;
        for partition in &space.partitions {
            self.drop_partition(partition).await;
            self.meta.delete_partition(partition.id).await?;
        }

        for alias in self.meta.query_aliases().await? {
            if alias.db_name == db.name && alias.space_name == space.name {
                self.meta.store().delete(&keys::alias(&alias.name)).await?;
                info!(alias = %alias.name, "alias removed with its space");
            }
        }
        self.meta
            .store()
            .delete(&keys::space_config(db.id, space.id))
            .await?;
        info!(db = %db.name, space = %space.name, space_id = space.id, "space deleted");
        Ok(())
    }

    /// Best-effort DeletePartition to every replica of `partition`.
    pub(crate) async fn drop_partition(&self, partition: &Partition) {
        let mut seen = HashSet::new();
        for &node_id in &partition.replicas {
            if !seen.insert(node_id) {
                continue;
            }
            match self.meta.query_server(node_id).await {
                Ok(Some(server)) => {
                    let addr = server.rpc_addr();
                    if let Err(e) = self.client.delete_partition(&addr, partition.id).await {
                        warn!(partition_id = partition.id, %addr, error = %e, "delete partition failed");
                    }
                }
                Ok(None) => warn!(partition_id = partition.id, node_id, "replica server not registered"),
                Err(e) => warn!(partition_id = partition.id, node_id, error = %e, "server lookup failed"),
            }
        }
    }
}
