//! Structural space changes: partition scale-out and range-rule mutation.

use serde::{Deserialize, Serialize};
use tracing::{error, info};
use vgrid_meta::{Db, Partition, PartitionId, RangeDef, Space, keys};
use vgrid_placement::assign_slots;

use crate::error::{MasterError, MasterResult};
use crate::service::MasterService;

/// A change to a space's partition rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleChange {
    /// Append ranges above every existing range.
    Add(Vec<RangeDef>),
    /// Remove the named range and every partition in it.
    Drop(String),
}

impl MasterService {
    /// Grow a space without a partition rule to `partition_num` partitions.
    pub async fn scale_space(
        &self,
        db_name: &str,
        space_name: &str,
        partition_num: u32,
    ) -> MasterResult<Space> {
        let db = self.query_db(db_name).await?;
        let guard = self
            .lock(&keys::lock_space(&db.name, space_name), self.config.lock_ttl())
            .await?;
        let result = self.scale_space_locked(&db, space_name, partition_num).await;
        self.unlock(guard).await;
        result
    }

    async fn scale_space_locked(&self, db: &Db, space_name: &str, partition_num: u32) -> MasterResult<Space> {
        let space = self.require_space_in(db, space_name).await?;
        if space.partition_rule.is_some() {
            return Err(MasterError::Validation(format!(
                "space {space_name} has a partition rule, change its ranges instead"
            )));
        }
        if partition_num <= space.partition_num {
            return Err(MasterError::Validation(format!(
                "partition_num {partition_num} must be greater than the current {}",
                space.partition_num
            )));
        }

        let mut added = Vec::new();
        for _ in space.partition_num..partition_num {
            added.push(Partition::new(
                self.new_partition_id().await?,
                space.id,
                space.db_id,
            ));
        }
        self.place_partitions(db, &space.resource_name, &mut added, space.replica_num)
            .await?;

        let mut next = space.clone();
        next.partition_num = partition_num;
        next.partitions.extend(added.iter().cloned());
        assign_slots(&mut next.partitions);

        let pids: Vec<PartitionId> = added.iter().map(|p| p.id).collect();
        if let Err(e) = self.create_partitions_and_wait(&next, &pids).await {
            error!(space = %space.name, error = %e, "scale-out failed, removing new partitions");
            self.forget_partitions(&added).await;
            return Err(e);
        }

        self.persist_space(&mut next).await?;
        info!(space = %next.name, from = space.partition_num, to = partition_num, "space scaled out");
        Ok(next)
    }

    /// Add or drop ranges of a space's partition rule.
    pub async fn change_partition_rule(
        &self,
        db_name: &str,
        space_name: &str,
        change: RuleChange,
    ) -> MasterResult<Space> {
        let db = self.query_db(db_name).await?;
        let guard = self
            .lock(&keys::lock_space(&db.name, space_name), self.config.lock_ttl())
            .await?;
        let result = match change {
            RuleChange::Add(ranges) => self.add_ranges(&db, space_name, ranges).await,
            RuleChange::Drop(name) => self.drop_range(&db, space_name, &name).await,
        };
        self.unlock(guard).await;
        result
    }

    async fn add_ranges(&self, db: &Db, space_name: &str, ranges: Vec<RangeDef>) -> MasterResult<Space> {
        let space = self.require_space_in(db, space_name).await?;
        let Some(rule) = &space.partition_rule else {
            return Err(MasterError::Validation(format!("space {space_name} has no partition rule")));
        };
        rule.check_no_overlap(&ranges).map_err(MasterError::Validation)?;

        let labels: Vec<Option<String>> = ranges.iter().map(|r| Some(r.name.clone())).collect();
        let mut added = self.allocate_partitions(&space, &labels).await?;
        self.place_partitions(db, &space.resource_name, &mut added, space.replica_num)
            .await?;

        let mut next = space.clone();
        if let Some(rule) = &mut next.partition_rule {
            rule.ranges.extend(ranges.iter().cloned());
            rule.partitions = rule.range_count();
        }
        next.partitions.extend(added.iter().cloned());
        assign_slots(&mut next.partitions);

        let pids: Vec<PartitionId> = added.iter().map(|p| p.id).collect();
        if let Err(e) = self.create_partitions_and_wait(&next, &pids).await {
            error!(space = %space.name, error = %e, "range add failed, removing new partitions");
            self.forget_partitions(&added).await;
            return Err(e);
        }

        self.persist_space(&mut next).await?;
        info!(space = %next.name, ranges = ranges.len(), partitions = added.len(), "ranges added");
        Ok(next)
    }

    async fn drop_range(&self, db: &Db, space_name: &str, range: &str) -> MasterResult<Space> {
        let mut space = self.require_space_in(db, space_name).await?;
        let Some(rule) = &mut space.partition_rule else {
            return Err(MasterError::Validation(format!("space {space_name} has no partition rule")));
        };
        if range.is_empty() {
            return Err(MasterError::Validation("range name is empty".to_string()));
        }
        if !rule.ranges.iter().any(|r| r.name == range) {
            return Err(MasterError::NotFound(format!("range {range} of space {space_name}")));
        }
        if rule.ranges.len() == 1 {
            return Err(MasterError::Validation(format!(
                "range {range} is the last range of space {space_name}"
            )));
        }
        rule.ranges.retain(|r| r.name != range);
        rule.partitions = rule.range_count();

        let (dropped, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut space.partitions)
            .into_iter()
            .partition(|p| p.name.as_deref() == Some(range));
        for partition in &dropped {
            self.drop_partition(partition).await;
            self.meta.delete_partition(partition.id).await?;
        }
        space.partitions = kept;
        assign_slots(&mut space.partitions);

        self.persist_space(&mut space).await?;
        info!(space = %space.name, %range, partitions = dropped.len(), "range dropped");
        Ok(space)
    }

    pub(crate) async fn require_space_in(&self, db: &Db, space_name: &str) -> MasterResult<Space> {
        self.meta
            .query_space_by_name(db.id, space_name)
            .await?
            .ok_or_else(|| MasterError::NotFound(format!("space {}/{space_name}", db.name)))
    }
}
