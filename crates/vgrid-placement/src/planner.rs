//! Placement planner: picks replica servers for new partitions.
//!
//! Greedy bin-packing: for each partition, walk candidates in ascending
//! load order, skip servers that failed the liveness probe or whose
//! anti-affinity zone already holds a replica of this partition, and take
//! the first `replica_num` that remain. Every pick bumps the candidate's
//! load so later partitions in the same batch see it.

use std::collections::{BTreeMap, HashSet};

use tracing::{debug, warn};
use vgrid_meta::{NodeId, PartitionId};

use crate::error::{PlacementError, PlacementResult};

/// A server considered for placement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub node_id: NodeId,
    pub addr: String,
    /// Anti-affinity key; empty means unrestricted.
    pub zone: String,
    /// Replicas currently hosted.
    pub load: u32,
    pub live: bool,
}

/// Replica selection for one partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub partition_id: PartitionId,
    pub node_ids: Vec<NodeId>,
    pub addrs: Vec<String>,
}

/// Placement state for one batch.
#[derive(Debug, Clone)]
pub struct Planner {
    candidates: Vec<Candidate>,
}

impl Planner {
    pub fn new(candidates: Vec<Candidate>) -> Self {
        Self { candidates }
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    pub fn load_of(&self, node_id: NodeId) -> Option<u32> {
        self.candidates
            .iter()
            .find(|c| c.node_id == node_id)
            .map(|c| c.load)
    }

    /// Candidate indexes in ascending (load, node id) order.
    fn by_load(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.candidates.len()).collect();
        order.sort_by_key(|&i| (self.candidates[i].load, self.candidates[i].node_id));
        order
    }

    /// Select `replica_num` servers for one partition.
    ///
    /// On failure nothing is committed: candidate loads are only bumped
    /// once the full replica set has been found.
    pub fn select(&mut self, partition_id: PartitionId, replica_num: usize) -> PlacementResult<Assignment> {
        let mut picked: Vec<usize> = Vec::with_capacity(replica_num);
        let mut zones: HashSet<&str> = HashSet::new();

        for i in self.by_load() {
            if picked.len() == replica_num {
                break;
            }
            let c = &self.candidates[i];
            if !c.live {
                debug!(node_id = c.node_id, "skipping server that failed liveness probe");
                continue;
            }
            if !c.zone.is_empty() && zones.contains(c.zone.as_str()) {
                continue;
            }
            if !c.zone.is_empty() {
                zones.insert(c.zone.as_str());
            }
            picked.push(i);
        }

        if picked.len() < replica_num {
            warn!(
                partition_id,
                wanted = replica_num,
                selected = picked.len(),
                "not enough eligible servers"
            );
            return Err(PlacementError::Capacity {
                partition_id,
                wanted: replica_num,
                selected: picked.len(),
            });
        }

        let mut assignment = Assignment {
            partition_id,
            node_ids: Vec::with_capacity(replica_num),
            addrs: Vec::with_capacity(replica_num),
        };
        for i in picked {
            let c = &mut self.candidates[i];
            c.load += 1;
            assignment.node_ids.push(c.node_id);
            assignment.addrs.push(c.addr.clone());
        }
        debug!(partition_id, nodes = ?assignment.node_ids, "partition placed");
        Ok(assignment)
    }

    /// Place a whole batch. Either every partition is placed or the planner
    /// is left untouched and the first capacity error is returned.
    pub fn plan_batch(
        &mut self,
        partition_ids: &[PartitionId],
        replica_num: usize,
    ) -> PlacementResult<BTreeMap<PartitionId, Assignment>> {
        let mut scratch = self.clone();
        let mut plan = BTreeMap::new();
        for &pid in partition_ids {
            let assignment = scratch.select(pid, replica_num)?;
            plan.insert(pid, assignment);
        }
        *self = scratch;
        Ok(plan)
    }
}
