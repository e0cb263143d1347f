//! CreatePartition fan-out and readiness polling.
//!
//! One task per (partition, replica address), all joined by a single
//! `JoinSet`. Tasks report failures on a shared channel with room for one
//! error: the first failure wins and later ones are dropped. The caller
//! polls the metadata store until every partition record exists, checking
//! the channel, finished tasks, and shutdown on every iteration.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info};
use vgrid_meta::{PartitionId, Space};

use crate::error::{MasterError, MasterResult};
use crate::service::MasterService;

impl MasterService {
    /// Send CreatePartition for `partition_ids` to every replica listed in
    /// `space`, then wait for the hosting nodes to register each partition.
    pub(crate) async fn create_partitions_and_wait(
        &self,
        space: &Space,
        partition_ids: &[PartitionId],
    ) -> MasterResult<()> {
        let mut targets = Vec::new();
        for &pid in partition_ids {
            let Some(partition) = space.partition(pid) else {
                return Err(MasterError::Internal(format!(
                    "partition {pid} is not part of space {}",
                    space.name
                )));
            };
            for &node_id in &partition.replicas {
                let server = self.meta.query_server(node_id).await?.ok_or_else(|| {
                    MasterError::UpstreamUnavailable(format!("server {node_id} is not registered"))
                })?;
                targets.push((pid, server.rpc_addr()));
            }
        }

        let descriptor = Arc::new(space.clone());
        let (err_tx, mut err_rx) = mpsc::channel::<MasterError>(1);
        let mut tasks = JoinSet::new();
        for (pid, addr) in targets {
            let client = Arc::clone(&self.client);
            let descriptor = Arc::clone(&descriptor);
            let err_tx = err_tx.clone();
            tasks.spawn(async move {
                if let Err(e) = client.create_partition(&addr, &descriptor, pid).await {
                    error!(partition_id = pid, %addr, error = %e, "create partition failed");
                    // A full channel already holds the winning error.
                    let _ = err_tx.try_send(MasterError::UpstreamUnavailable(format!(
                        "create partition {pid} on {addr}: {e}"
                    )));
                }
            });
        }
        drop(err_tx);

        if let Err(e) = self.wait_for_partitions(space, partition_ids, &mut tasks, &mut err_rx).await {
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
            return Err(e);
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                return Err(MasterError::Internal(format!("create partition task failed: {e}")));
            }
        }
        if let Ok(e) = err_rx.try_recv() {
            return Err(e);
        }
        info!(space = %space.name, partitions = partition_ids.len(), "partitions created");
        Ok(())
    }

    async fn wait_for_partitions(
        &self,
        space: &Space,
        partition_ids: &[PartitionId],
        tasks: &mut JoinSet<()>,
        errors: &mut mpsc::Receiver<MasterError>,
    ) -> MasterResult<()> {
        let deadline = Instant::now() + self.config.lock_ttl();
        let mut pending: BTreeSet<PartitionId> = partition_ids.iter().copied().collect();
        let mut rounds = 0u64;

        loop {
            if let Ok(e) = errors.try_recv() {
                return Err(e);
            }
            while let Some(joined) = tasks.try_join_next() {
                if let Err(e) = joined {
                    return Err(MasterError::Internal(format!("create partition task failed: {e}")));
                }
            }
            if self.cancelled() {
                return Err(MasterError::Internal(format!(
                    "creating partitions of space {} was cancelled",
                    space.name
                )));
            }
            if Instant::now() >= deadline {
                return Err(MasterError::Timeout(format!(
                    "partitions {pending:?} of space {} never reported",
                    space.name
                )));
            }

            let mut ready = Vec::new();
            for &pid in &pending {
                if self.meta.query_partition(pid).await?.is_some() {
                    ready.push(pid);
                }
            }
            for pid in ready {
                pending.remove(&pid);
            }
            if pending.is_empty() {
                return Ok(());
            }

            rounds += 1;
            if rounds % 20 == 0 {
                debug!(space = %space.name, ?pending, "waiting for partitions");
            }
            tokio::time::sleep(self.config.poll_interval()).await;
        }
    }
}
