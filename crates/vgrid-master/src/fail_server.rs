//! Fail-server worklist maintenance.
//!
//! Server records live under a lease; when a node stops renewing, its record
//! disappears. The watcher compares consecutive scans and records a server
//! that vanished while it still hosted partitions, so an operator can move
//! them with [`crate::MasterService::recover_fail_server`]. A server that
//! registers again is taken off the list.

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::watch;
use tracing::{debug, info, warn};
use vgrid_meta::{FailServer, MetaClient, NodeId, Server};

use crate::error::MasterResult;

pub struct FailServerWatcher {
    meta: MetaClient,
    interval: Duration,
    last_seen: HashMap<NodeId, Server>,
}

impl FailServerWatcher {
    pub fn new(meta: MetaClient, interval: Duration) -> Self {
        Self {
            meta,
            interval,
            last_seen: HashMap::new(),
        }
    }

    /// Compare the registered servers with the previous scan.
    ///
    /// Returns the ids newly added to the worklist.
    pub async fn scan(&mut self) -> MasterResult<Vec<NodeId>> {
        let current: HashMap<NodeId, Server> = self
            .meta
            .query_servers()
            .await?
            .into_iter()
            .map(|s| (s.id, s))
            .collect();

        for fs in self.meta.query_fail_servers().await? {
            if current.contains_key(&fs.id) {
                self.meta.delete_fail_server(fs.id).await?;
                info!(node_id = fs.id, ip = %fs.node.ip, "failed server is back, removed from worklist");
            }
        }

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let mut failed = Vec::new();
        for (id, server) in &self.last_seen {
            if current.contains_key(id) || server.partition_ids.is_empty() {
                continue;
            }
            self.meta
                .put_fail_server(&FailServer {
                    id: *id,
                    time: now,
                    node: server.clone(),
                })
                .await?;
            warn!(node_id = id, ip = %server.ip, partitions = server.partition_ids.len(), "server lost, added to worklist");
            failed.push(*id);
        }

        self.last_seen = current;
        Ok(failed)
    }

    /// Scan on every interval until shutdown.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(interval = ?self.interval, "fail-server watcher started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    match self.scan().await {
                        Ok(failed) if !failed.is_empty() => debug!(?failed, "fail-server scan complete"),
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "fail-server scan failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("fail-server watcher shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use vgrid_meta::RedbMetaStore;

    fn server(id: NodeId, partitions: &[u32]) -> Server {
        Server {
            id,
            ip: format!("10.0.0.{id}"),
            host_ip: String::new(),
            host_rack: String::new(),
            host_zone: String::new(),
            private: false,
            resource_name: "default".to_string(),
            rpc_port: 8081,
            raft_heartbeat_port: 8898,
            raft_replicate_port: 8899,
            partition_ids: partitions.to_vec(),
            version: None,
        }
    }

    #[tokio::test]
    async fn vanished_server_with_partitions_is_recorded() {
        let meta = MetaClient::new(Arc::new(RedbMetaStore::open_in_memory().unwrap()));
        let lease_a = meta.store().grant_lease(Duration::from_secs(60)).await.unwrap();
        let lease_b = meta.store().grant_lease(Duration::from_secs(60)).await.unwrap();
        meta.put_server_with_lease(&server(1, &[7]), lease_a).await.unwrap();
        meta.put_server_with_lease(&server(2, &[]), lease_b).await.unwrap();

        let mut watcher = FailServerWatcher::new(meta.clone(), Duration::from_secs(1));
        assert!(watcher.scan().await.unwrap().is_empty());

        meta.store().revoke_lease(lease_a).await.unwrap();
        meta.store().revoke_lease(lease_b).await.unwrap();
        assert_eq!(watcher.scan().await.unwrap(), vec![1]);

        let worklist = meta.query_fail_servers().await.unwrap();
        assert_eq!(worklist.len(), 1);
        assert_eq!(worklist[0].node.partition_ids, vec![7]);

        let lease = meta.store().grant_lease(Duration::from_secs(60)).await.unwrap();
        meta.put_server_with_lease(&server(1, &[7]), lease).await.unwrap();
        watcher.scan().await.unwrap();
        assert!(meta.query_fail_servers().await.unwrap().is_empty());
    }
}
