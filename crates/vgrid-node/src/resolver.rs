//! Peer address table for the replication transport.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, warn};
use vgrid_meta::{MetaClient, NodeId, ReplicaAddr};

/// Replication addresses of known peers, keyed by node id.
///
/// Peers are tracked once they share a partition with this node; a tracked
/// peer stays unresolved until its server record is seen. A refresh keeps
/// the last known address of a peer whose record is currently missing.
#[derive(Debug, Default)]
pub struct PeerResolver {
    peers: RwLock<BTreeMap<NodeId, Option<ReplicaAddr>>>,
}

impl PeerResolver {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<NodeId, Option<ReplicaAddr>>> {
        self.peers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<NodeId, Option<ReplicaAddr>>> {
        self.peers.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn track(&self, node_id: NodeId) {
        self.write().entry(node_id).or_insert(None);
    }

    pub fn resolve(&self, node_id: NodeId) -> Option<ReplicaAddr> {
        self.read().get(&node_id).cloned().flatten()
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.read().keys().copied().collect()
    }

    /// Re-resolve every tracked peer from its server record.
    ///
    /// Returns the number of peers with a known address afterwards.
    pub async fn refresh(&self, meta: &MetaClient) -> usize {
        let mut updates = Vec::new();
        for node_id in self.node_ids() {
            match meta.query_server(node_id).await {
                Ok(Some(server)) => updates.push((node_id, server.replica_addr())),
                Ok(None) => debug!(node_id, "peer not registered, keeping last address"),
                Err(e) => warn!(node_id, error = %e, "peer lookup failed"),
            }
        }

        let mut peers = self.write();
        for (node_id, addr) in updates {
            peers.insert(node_id, Some(addr));
        }
        peers.values().filter(|a| a.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use vgrid_meta::{RedbMetaStore, Server};

    fn server(id: NodeId, ip: &str) -> Server {
        Server {
            id,
            ip: ip.to_string(),
            host_ip: String::new(),
            host_rack: String::new(),
            host_zone: String::new(),
            private: false,
            resource_name: "default".to_string(),
            rpc_port: 8081,
            raft_heartbeat_port: 8898,
            raft_replicate_port: 8899,
            partition_ids: vec![],
            version: None,
        }
    }

    #[tokio::test]
    async fn refresh_follows_server_records() {
        let meta = MetaClient::new(Arc::new(RedbMetaStore::open_in_memory().unwrap()));
        let lease = meta.store().grant_lease(Duration::from_secs(60)).await.unwrap();
        meta.put_server_with_lease(&server(2, "10.0.0.2"), lease)
            .await
            .unwrap();

        let resolver = PeerResolver::new();
        resolver.track(2);
        resolver.track(3);
        assert!(resolver.resolve(2).is_none());

        assert_eq!(resolver.refresh(&meta).await, 1);
        assert_eq!(resolver.resolve(2).unwrap().replicate, "10.0.0.2:8899");
        assert!(resolver.resolve(3).is_none());

        // A moved peer is picked up; a vanished one keeps its last address.
        meta.put_server_with_lease(&server(2, "10.0.0.20"), lease)
            .await
            .unwrap();
        resolver.refresh(&meta).await;
        assert_eq!(resolver.resolve(2).unwrap().heartbeat, "10.0.0.20:8898");

        meta.store().revoke_lease(lease).await.unwrap();
        assert_eq!(resolver.refresh(&meta).await, 1);
        assert!(resolver.resolve(2).is_some());
        assert_eq!(resolver.node_ids(), vec![2, 3]);
    }
}
