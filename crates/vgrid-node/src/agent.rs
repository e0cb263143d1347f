//! Heartbeat agent: keeps a data node registered with the cluster.
//!
//! The agent runs on each data node. On start it drops local partitions
//! whose record no longer lists this node, then registers the server
//! descriptor under a lease and keeps that lease alive. While running it
//! refreshes the peer table and republishes the descriptor whenever the
//! set of local partitions changes. If the keep-alive stream closes, it
//! waits and registers again under a new lease.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use vgrid_core::VgridConfig;
use vgrid_meta::{BuildVersion, LeaseId, MetaClient, NodeId, PartitionId, Server};

use crate::error::AgentResult;
use crate::local::LocalPartitions;
use crate::resolver::PeerResolver;

/// Timing of the agent's loops.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub lease_ttl: Duration,
    /// Interval of peer refresh and partition-set checks.
    pub refresh_interval: Duration,
    /// Pause before registering again after the keep-alive stream closed.
    pub reconnect_delay: Duration,
}

impl AgentSettings {
    pub fn from_config(config: &VgridConfig) -> Self {
        Self {
            lease_ttl: config.ps.lease_ttl(),
            refresh_interval: config.ps.resolver_refresh(),
            reconnect_delay: config.ps.reconnect_delay(),
        }
    }
}

/// Server descriptor a data node registers with.
pub fn server_descriptor(node_id: NodeId, ip: &str, config: &VgridConfig) -> Server {
    Server {
        id: node_id,
        ip: ip.to_string(),
        host_ip: config.ps.host_ip.clone(),
        host_rack: config.ps.host_rack.clone(),
        host_zone: config.ps.host_zone.clone(),
        private: config.ps.private,
        resource_name: config.global.resource_name.clone(),
        rpc_port: config.ps.rpc_port,
        raft_heartbeat_port: config.ps.raft_heartbeat_port,
        raft_replicate_port: config.ps.raft_replicate_port,
        partition_ids: Vec::new(),
        version: Some(BuildVersion {
            build_version: env!("CARGO_PKG_VERSION").to_string(),
            commit_id: String::new(),
        }),
    }
}

pub struct HeartbeatAgent {
    meta: MetaClient,
    /// Last published descriptor; `partition_ids` is kept sorted.
    server: Server,
    partitions: Arc<dyn LocalPartitions>,
    resolver: Arc<PeerResolver>,
    settings: AgentSettings,
    lease: Option<LeaseId>,
}

impl HeartbeatAgent {
    pub fn new(
        meta: MetaClient,
        server: Server,
        partitions: Arc<dyn LocalPartitions>,
        settings: AgentSettings,
    ) -> Self {
        Self {
            meta,
            server,
            partitions,
            resolver: Arc::new(PeerResolver::new()),
            settings,
            lease: None,
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.server.id
    }

    /// Peer table shared with the replication transport.
    pub fn resolver(&self) -> Arc<PeerResolver> {
        Arc::clone(&self.resolver)
    }

    /// Lease of the current registration, if any.
    pub fn lease(&self) -> Option<LeaseId> {
        self.lease
    }

    pub fn published_partitions(&self) -> &[PartitionId] {
        &self.server.partition_ids
    }

    // ── Startup reconciliation ─────────────────────────────────────

    /// Purge local partitions whose record no longer lists this node.
    ///
    /// A partition without a record is kept; it may still be registering.
    pub async fn purge_orphans(&self) -> AgentResult<Vec<PartitionId>> {
        let node_id = self.server.id;
        let mut purged = Vec::new();
        for pid in self.partitions.partition_ids()? {
            match self.meta.query_partition(pid).await {
                Ok(Some(record)) if !record.has_replica(node_id) => {
                    warn!(partition_id = pid, node_id, replicas = ?record.replicas, "local partition no longer assigned here");
                    self.partitions.purge(pid)?;
                    purged.push(pid);
                }
                Ok(Some(_)) => {}
                Ok(None) => debug!(partition_id = pid, "no record for local partition, keeping it"),
                Err(e) => error!(partition_id = pid, error = %e, "partition lookup failed, keeping it"),
            }
        }
        Ok(purged)
    }

    // ── Registration ───────────────────────────────────────────────

    /// Publish the descriptor under a fresh lease and start keeping it alive.
    pub async fn register(&mut self) -> AgentResult<mpsc::Receiver<LeaseId>> {
        let partition_ids = self.partitions.partition_ids()?;
        self.track_peers(&partition_ids).await;
        self.server.partition_ids = partition_ids;

        let store = self.meta.store();
        let lease = store.grant_lease(self.settings.lease_ttl).await?;
        self.meta.put_server_with_lease(&self.server, lease).await?;
        let renewals = store.keep_alive(lease).await?;
        self.lease = Some(lease);
        info!(
            node_id = self.server.id,
            ip = %self.server.ip,
            lease,
            partitions = self.server.partition_ids.len(),
            "server registered"
        );
        Ok(renewals)
    }

    /// Refresh the peer table, then republish if the local partition set
    /// changed since the last publish. Returns whether it republished.
    pub async fn refresh(&mut self) -> AgentResult<bool> {
        let resolved = self.resolver.refresh(&self.meta).await;
        debug!(node_id = self.server.id, resolved, "peer table refreshed");

        let Some(lease) = self.lease else {
            debug!(node_id = self.server.id, "not registered yet, skipping publish");
            return Ok(false);
        };
        let current = self.partitions.partition_ids()?;
        if current == self.server.partition_ids {
            return Ok(false);
        }

        let added: Vec<PartitionId> = current
            .iter()
            .copied()
            .filter(|pid| !self.server.partition_ids.contains(pid))
            .collect();
        self.track_peers(&added).await;

        let mut next = self.server.clone();
        next.partition_ids = current;
        self.meta.put_server_with_lease(&next, lease).await?;
        info!(
            node_id = next.id,
            lease,
            before = self.server.partition_ids.len(),
            after = next.partition_ids.len(),
            "partition set changed, server republished"
        );
        self.server = next;
        Ok(true)
    }

    /// Track every other replica of `partition_ids` in the peer table.
    async fn track_peers(&self, partition_ids: &[PartitionId]) {
        for &pid in partition_ids {
            match self.meta.query_partition(pid).await {
                Ok(Some(record)) => {
                    for node_id in record.replicas.into_iter().filter(|id| *id != self.server.id) {
                        self.resolver.track(node_id);
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(partition_id = pid, error = %e, "partition lookup failed"),
            }
        }
    }

    // ── Main loop ──────────────────────────────────────────────────

    /// Reconcile, register, then keep the registration current until shutdown.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> AgentResult<()> {
        let purged = self.purge_orphans().await?;
        if !purged.is_empty() {
            info!(node_id = self.server.id, ?purged, "orphaned partitions purged");
        }
        let mut renewals = self.register().await?;

        let mut ticker = tokio::time::interval(self.settings.refresh_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(node_id = self.server.id, interval = ?self.settings.refresh_interval, "heartbeat agent started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.refresh().await {
                        warn!(node_id = self.server.id, error = %e, "refresh failed");
                    }
                }
                renewed = renewals.recv() => {
                    if renewed.is_some() {
                        continue;
                    }
                    self.lease = None;
                    warn!(
                        node_id = self.server.id,
                        delay = ?self.settings.reconnect_delay,
                        "keep-alive closed, registering again after delay"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(self.settings.reconnect_delay) => {}
                        _ = shutdown.changed() => break,
                    }
                    match self.register().await {
                        Ok(rx) => renewals = rx,
                        // The closed receiver brings us back here after another delay.
                        Err(e) => error!(node_id = self.server.id, error = %e, "registration failed"),
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        info!(node_id = self.server.id, "heartbeat agent shutting down");
        Ok(())
    }
}
