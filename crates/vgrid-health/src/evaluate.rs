//! Pure health rules.
//!
//! Yellow only for peers the queried replica cannot reach. Everything
//! else that is wrong is red: failed status query, no leader, a replica
//! count that differs from the space's `replica_num`, or a probing-replica
//! count other than one matching the reported leader.

use vgrid_meta::Space;
use vgrid_rpc::{PartitionStatus, ReplicaState};

use crate::status::HealthLevel;

/// Evaluated level for one partition plus the messages explaining it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub level: HealthLevel,
    pub errors: Vec<String>,
}

impl Verdict {
    fn green() -> Self {
        Self {
            level: HealthLevel::Green,
            errors: Vec::new(),
        }
    }

    fn red(&mut self, msg: String) {
        self.level = HealthLevel::Red;
        self.errors.push(msg);
    }
}

/// Check the declared partition count of a space against its records.
pub fn check_partition_count(space: &Space) -> Option<String> {
    let expected = space.expected_partition_count() as usize;
    if space.partitions.len() == expected {
        return None;
    }
    Some(format!(
        "space {}: {} partitions listed, {} expected",
        space.name,
        space.partitions.len(),
        expected
    ))
}

/// Evaluate the status returned by a partition's leader.
pub fn evaluate_status(space: &Space, status: &PartitionStatus) -> Verdict {
    let pid = status.partition_id;
    let mut verdict = Verdict::green();
    if !status.unreachable.is_empty() {
        verdict.level = HealthLevel::Yellow;
    }

    let Some(raft) = &status.raft else {
        verdict.red(format!("partition {pid} in space {} has no leader", space.name));
        return verdict;
    };
    if raft.leader == 0 {
        verdict.red(format!("partition {pid} in space {} has no leader", space.name));
        return verdict;
    }
    if raft.replicas.len() != usize::from(space.replica_num) {
        verdict.red(format!(
            "partition {pid} in space {}: {} replicas, replica_num is {}",
            space.name,
            raft.replicas.len(),
            space.replica_num
        ));
        return verdict;
    }

    let probing: Vec<_> = raft
        .replicas
        .iter()
        .filter(|(id, _)| !status.unreachable.contains(id))
        .filter(|(_, state)| **state == ReplicaState::Probe)
        .map(|(id, _)| *id)
        .collect();
    if probing.len() != 1 {
        verdict.red(format!(
            "partition {pid} in space {} has {} probing replicas",
            space.name,
            probing.len()
        ));
    }
    let probing_leader = probing.last().copied().unwrap_or(0);
    if probing_leader != raft.leader {
        verdict.red(format!(
            "partition {pid} in space {}: probing replica {probing_leader} is not raft leader {}",
            space.name, raft.leader
        ));
    }
    verdict
}
