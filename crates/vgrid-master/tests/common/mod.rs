//! Shared harness: an in-memory metadata store, simulated data nodes, and
//! a master configured with short timeouts.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use vgrid_core::{AntiAffinity, VgridConfig};
use vgrid_master::MasterService;
use vgrid_meta::{
    Db, Field, FieldType, LeaseId, MetaClient, NodeId, PartitionId, PartitionRule, RangeDef,
    RedbMetaStore, Server, Space,
};
use vgrid_rpc::{LocalDataPlane, RpcCall, RpcMethod};

pub struct Cluster {
    pub meta: MetaClient,
    pub plane: LocalDataPlane,
    pub master: MasterService,
    leases: HashMap<NodeId, LeaseId>,
}

pub fn fast_config() -> VgridConfig {
    let mut config = VgridConfig::default();
    config.master.lock_ttl_secs = 3;
    config.master.light_lock_ttl_secs = 2;
    config.master.id_timeout_ms = 1000;
    config.master.poll_interval_ms = 5;
    config.master.leader_retry_times = 2;
    config.master.leader_retry_backoff_ms = 10;
    config.master.stats_timeout_secs = 1;
    config.ps.raft_heartbeat_interval_ms = 1;
    config.ps.remove_cooldown_multiplier = 1;
    config
}

pub fn server(id: NodeId, zone: &str) -> Server {
    Server {
        id,
        ip: format!("10.0.0.{id}"),
        host_ip: format!("192.168.0.{id}"),
        host_rack: String::new(),
        host_zone: zone.to_string(),
        private: false,
        resource_name: "default".to_string(),
        rpc_port: 8081,
        raft_heartbeat_port: 8898,
        raft_replicate_port: 8899,
        partition_ids: vec![],
        version: None,
    }
}

pub fn addr(id: NodeId) -> String {
    format!("10.0.0.{id}:8081")
}

impl Cluster {
    /// `n` live servers with ids `1..=n`, all in one zone.
    pub async fn new(n: u64) -> Self {
        Self::with_servers((1..=n).map(|id| server(id, "z1")).collect(), fast_config()).await
    }

    pub async fn with_servers(servers: Vec<Server>, config: VgridConfig) -> Self {
        let meta = MetaClient::new(Arc::new(RedbMetaStore::open_in_memory().unwrap()));
        let plane = LocalDataPlane::new(meta.clone());
        let mut leases = HashMap::new();
        for s in &servers {
            let lease = meta.store().grant_lease(Duration::from_secs(60)).await.unwrap();
            meta.put_server_with_lease(s, lease).await.unwrap();
            plane.add_node(s.id, &s.rpc_addr());
            leases.insert(s.id, lease);
        }
        let master = MasterService::new(meta.clone(), Arc::new(plane.clone()), &config);
        Self {
            meta,
            plane,
            master,
            leases,
        }
    }

    /// Servers in `zones[i]` for id `i + 1`, with zone anti-affinity.
    pub async fn zoned(zones: &[&str]) -> Self {
        let mut config = fast_config();
        config.ps.replica_anti_affinity = AntiAffinity::Zone;
        let servers = zones
            .iter()
            .enumerate()
            .map(|(i, z)| server(i as u64 + 1, z))
            .collect();
        Self::with_servers(servers, config).await
    }

    /// Take a node down: its lease is revoked and RPCs to it fail.
    pub async fn kill(&self, id: NodeId) {
        self.plane.set_live(&addr(id), false);
        if let Some(lease) = self.leases.get(&id) {
            self.meta.store().revoke_lease(*lease).await.unwrap();
        }
    }

    /// Rewrite a server record under its lease, as its heartbeat would.
    pub async fn republish(&self, id: NodeId, partition_ids: Vec<PartitionId>) {
        let mut record = self.meta.query_server(id).await.unwrap().unwrap();
        record.partition_ids = partition_ids;
        self.meta
            .put_server_with_lease(&record, self.leases[&id])
            .await
            .unwrap();
    }

    pub async fn create_db(&self, name: &str) -> Db {
        self.master
            .create_db(Db {
                id: 0,
                name: name.to_string(),
                ps: vec![],
            })
            .await
            .unwrap()
    }

    pub fn calls_of(&self, method: RpcMethod) -> Vec<RpcCall> {
        self.plane
            .calls()
            .into_iter()
            .filter(|c| c.method == method)
            .collect()
    }
}

pub fn vector_field(name: &str) -> Field {
    Field {
        name: name.to_string(),
        field_type: FieldType::Vector,
        dimension: Some(8),
        index: None,
    }
}

pub fn space_def(name: &str, partition_num: u32, replica_num: u8) -> Space {
    Space {
        id: 0,
        db_id: 0,
        name: name.to_string(),
        partition_num,
        replica_num,
        fields: vec![vector_field("emb")],
        index: None,
        partition_rule: None,
        partitions: vec![],
        enabled: false,
        version: 0,
        resource_name: String::new(),
    }
}

pub fn ranged_space_def(name: &str, partition_num: u32, ranges: &[(&str, i64)]) -> Space {
    let mut space = space_def(name, partition_num, 1);
    space.partition_rule = Some(PartitionRule {
        field: "ts".to_string(),
        ranges: ranges
            .iter()
            .map(|(n, v)| RangeDef {
                name: n.to_string(),
                value: *v,
            })
            .collect(),
        partitions: 0,
    });
    space
}
