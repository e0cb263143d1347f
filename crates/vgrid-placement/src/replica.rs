//! Change-set planning for bulk replica-count changes.

use vgrid_meta::{MemberChange, MemberOp, NodeId, Partition, PartitionId};

use crate::error::{PlacementError, PlacementResult};

/// A server and the partitions it currently hosts.
#[derive(Debug, Clone)]
pub struct ServerLoad {
    pub node_id: NodeId,
    pub partition_ids: Vec<PartitionId>,
}

/// Plan one replica more (or fewer) for every partition not yet at `target`.
///
/// For each partition the servers are re-sorted by hosted-partition count;
/// Add takes the least-loaded server missing the partition, Remove the
/// least-loaded server holding it. Each pick updates that server's count
/// before the next partition is considered. Partitions already at
/// `target` are skipped, so re-running after a partial failure only plans
/// the remaining work.
pub fn plan_replica_change(
    mut servers: Vec<ServerLoad>,
    partitions: &[Partition],
    op: MemberOp,
    target: usize,
) -> PlacementResult<Vec<MemberChange>> {
    if op == MemberOp::Add && target > servers.len() {
        return Err(PlacementError::ReplicaExceedsServers {
            wanted: target,
            servers: servers.len(),
        });
    }

    let mut changes = Vec::new();
    for partition in partitions {
        let done = match op {
            MemberOp::Add => partition.replicas.len() >= target,
            MemberOp::Remove => partition.replicas.len() <= target,
        };
        if done {
            continue;
        }

        servers.sort_by_key(|s| (s.partition_ids.len(), s.node_id));
        let pick = servers.iter_mut().find(|s| match op {
            MemberOp::Add => !partition.replicas.contains(&s.node_id),
            MemberOp::Remove => partition.replicas.contains(&s.node_id),
        });
        let Some(server) = pick else {
            return Err(PlacementError::NoCandidates(format!(
                "no server to {op:?} for partition {}",
                partition.id
            )));
        };
        match op {
            MemberOp::Add => server.partition_ids.push(partition.id),
            MemberOp::Remove => server.partition_ids.retain(|p| *p != partition.id),
        }
        changes.push(MemberChange {
            partition_id: partition.id,
            node_id: server.node_id,
            op,
        });
    }
    Ok(changes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(id: PartitionId, replicas: &[NodeId]) -> Partition {
        let mut p = Partition::new(id, 1, 1);
        p.replicas = replicas.to_vec();
        p
    }

    fn servers(parts: &[Partition], ids: &[NodeId]) -> Vec<ServerLoad> {
        ids.iter()
            .map(|&id| ServerLoad {
                node_id: id,
                partition_ids: parts
                    .iter()
                    .filter(|p| p.replicas.contains(&id))
                    .map(|p| p.id)
                    .collect(),
            })
            .collect()
    }

    #[test]
    fn add_spreads_across_least_loaded() {
        let parts = vec![part(1, &[1]), part(2, &[2]), part(3, &[1])];
        let changes = plan_replica_change(servers(&parts, &[1, 2, 3]), &parts, MemberOp::Add, 2).unwrap();

        assert_eq!(changes.len(), 3);
        // Server 3 starts empty and is picked first.
        assert_eq!(changes[0], MemberChange { partition_id: 1, node_id: 3, op: MemberOp::Add });
        for c in &changes {
            let p = parts.iter().find(|p| p.id == c.partition_id).unwrap();
            assert!(!p.replicas.contains(&c.node_id));
        }
    }

    #[test]
    fn remove_targets_current_holders() {
        let parts = vec![part(1, &[1, 2]), part(2, &[2, 3])];
        let changes =
            plan_replica_change(servers(&parts, &[1, 2, 3]), &parts, MemberOp::Remove, 1).unwrap();
        assert_eq!(changes.len(), 2);
        for c in &changes {
            let p = parts.iter().find(|p| p.id == c.partition_id).unwrap();
            assert!(p.replicas.contains(&c.node_id));
        }
    }

    #[test]
    fn rerun_skips_partitions_already_at_target() {
        let parts = vec![part(1, &[1, 2]), part(2, &[2])];
        let changes = plan_replica_change(servers(&parts, &[1, 2, 3]), &parts, MemberOp::Add, 2).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].partition_id, 2);
    }

    #[test]
    fn add_beyond_server_count_is_rejected() {
        let parts = vec![part(1, &[1, 2])];
        let err = plan_replica_change(servers(&parts, &[1, 2]), &parts, MemberOp::Add, 3).unwrap_err();
        assert_eq!(err, PlacementError::ReplicaExceedsServers { wanted: 3, servers: 2 });
    }
}
