//! HealthAggregator: describe spaces, databases, and the cluster.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error};
use vgrid_meta::{Db, MetaClient, MetaError, Space};
use vgrid_rpc::PartitionServerClient;

use crate::evaluate::{check_partition_count, evaluate_status};
use crate::status::{ClusterInfo, DbInfo, HealthLevel, PartitionInfo, SpaceInfo};

pub type HealthResult<T> = Result<T, HealthError>;

#[derive(Debug, Error)]
pub enum HealthError {
    #[error("db {0} not found")]
    DbNotFound(String),

    #[error("space {0} not found")]
    SpaceNotFound(String),

    #[error(transparent)]
    Meta(#[from] MetaError),
}

#[derive(Clone)]
pub struct HealthAggregator {
    meta: MetaClient,
    client: Arc<dyn PartitionServerClient>,
}

impl HealthAggregator {
    pub fn new(meta: MetaClient, client: Arc<dyn PartitionServerClient>) -> Self {
        Self { meta, client }
    }

    /// Query every partition of `space` and fold the results.
    pub async fn describe_space(&self, space: &Space, verbose: bool) -> HealthResult<SpaceInfo> {
        let mut info = SpaceInfo {
            space_id: space.id,
            db_id: space.db_id,
            name: space.name.clone(),
            partition_num: space.partition_num,
            replica_num: space.replica_num,
            enabled: space.enabled,
            status: HealthLevel::Green,
            doc_num: 0,
            errors: Vec::new(),
            partitions: Vec::new(),
        };
        if let Some(msg) = check_partition_count(space) {
            error!(space = %space.name, "{msg}");
            info.errors.push(msg);
            info.status = HealthLevel::Red;
        }

        for listed in &space.partitions {
            let Some(record) = self.meta.query_partition(listed.id).await? else {
                let msg = format!("partition {} of space {} has no metadata record", listed.id, space.name);
                error!(partition_id = listed.id, "{msg}");
                info.errors.push(msg);
                info.status = HealthLevel::Red;
                continue;
            };

            let node_id = match record.leader_id {
                0 => record.replicas.first().copied().unwrap_or(0),
                id => id,
            };
            let Some(server) = self.meta.query_server(node_id).await? else {
                let msg = format!(
                    "space {} partition {}: server {node_id} not found",
                    space.name, listed.id
                );
                error!(partition_id = listed.id, node_id, "{msg}");
                info.errors.push(msg);
                info.status = HealthLevel::Red;
                continue;
            };

            let mut pinfo = PartitionInfo {
                partition_id: listed.id,
                name: listed.name.clone(),
                status: HealthLevel::Green,
                replica_num: record.replicas.len(),
                node_id: server.id,
                ip: server.ip.clone(),
                unreachable: Vec::new(),
                replica_status: record.replica_status.clone(),
                raft: None,
                doc_num: 0,
            };

            match self
                .client
                .partition_info(&server.rpc_addr(), listed.id, verbose)
                .await
            {
                Ok(status) => {
                    let verdict = evaluate_status(space, &status);
                    for msg in &verdict.errors {
                        error!(partition_id = listed.id, "{msg}");
                    }
                    info.errors.extend(verdict.errors);
                    pinfo.status = verdict.level;
                    pinfo.unreachable = status.unreachable;
                    pinfo.raft = status.raft;
                    pinfo.doc_num = status.doc_num;
                }
                Err(e) => {
                    let msg = format!(
                        "space {} server {} partition {}: status query failed: {e}",
                        space.name, server.id, listed.id
                    );
                    error!(partition_id = listed.id, "{msg}");
                    info.errors.push(msg);
                    pinfo.status = HealthLevel::Red;
                }
            }

            info.doc_num += pinfo.doc_num;
            info.status = info.status.max(pinfo.status);
            info.partitions.push(pinfo);
        }

        debug!(space = %space.name, status = info.status.color(), "space described");
        Ok(info)
    }

    /// Describe one database, optionally limited to the named spaces.
    pub async fn describe_db(&self, db: &Db, space_names: &[String], verbose: bool) -> HealthResult<DbInfo> {
        let mut spaces = self.meta.query_spaces(db.id).await?;
        if !space_names.is_empty() {
            for name in space_names {
                if !spaces.iter().any(|s| &s.name == name) {
                    return Err(HealthError::SpaceNotFound(format!("{}/{name}", db.name)));
                }
            }
            spaces.retain(|s| space_names.contains(&s.name));
        }

        let mut info = DbInfo {
            db_id: db.id,
            name: db.name.clone(),
            space_num: spaces.len(),
            status: HealthLevel::Green,
            errors: Vec::new(),
            spaces: Vec::with_capacity(spaces.len()),
        };
        for space in &spaces {
            let sinfo = self.describe_space(space, verbose).await?;
            info.errors.extend(sinfo.errors.iter().cloned());
            info.spaces.push(sinfo);
        }
        info.status = HealthLevel::worst(info.spaces.iter().map(|s| s.status));
        Ok(info)
    }

    /// Describe the named databases (all when empty).
    pub async fn describe_cluster(
        &self,
        db_names: &[String],
        space_names: &[String],
        verbose: bool,
    ) -> HealthResult<ClusterInfo> {
        let dbs = if db_names.is_empty() {
            self.meta.query_dbs().await?
        } else {
            let mut dbs = Vec::with_capacity(db_names.len());
            for name in db_names {
                match self.meta.query_db_by_name(name).await? {
                    Some(db) => dbs.push(db),
                    None => return Err(HealthError::DbNotFound(name.clone())),
                }
            }
            dbs
        };

        let mut infos = Vec::with_capacity(dbs.len());
        for db in &dbs {
            infos.push(self.describe_db(db, space_names, verbose).await?);
        }
        Ok(ClusterInfo {
            status: HealthLevel::worst(infos.iter().map(|d| d.status)),
            dbs: infos,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use vgrid_meta::{Field, FieldType, NodeId, Partition, RedbMetaStore, Server, keys};
    use vgrid_rpc::LocalDataPlane;

    struct Fixture {
        meta: MetaClient,
        plane: LocalDataPlane,
        health: HealthAggregator,
    }

    async fn fixture(nodes: &[NodeId]) -> Fixture {
        let meta = MetaClient::new(Arc::new(RedbMetaStore::open_in_memory().unwrap()));
        let plane = LocalDataPlane::new(meta.clone());
        let lease = meta.store().grant_lease(Duration::from_secs(60)).await.unwrap();
        for &id in nodes {
            let ip = format!("10.0.0.{id}");
            let server = Server {
                id,
                ip: ip.clone(),
                host_ip: ip.clone(),
                host_rack: String::new(),
                host_zone: String::new(),
                private: false,
                resource_name: "default".to_string(),
                rpc_port: 8081,
                raft_heartbeat_port: 8898,
                raft_replicate_port: 8899,
                partition_ids: vec![],
                version: None,
            };
            plane.add_node(id, &server.rpc_addr());
            meta.put_server_with_lease(&server, lease).await.unwrap();
        }
        let health = HealthAggregator::new(meta.clone(), Arc::new(plane.clone()));
        Fixture { meta, plane, health }
    }

    async fn space(f: &Fixture, replicas: &[NodeId]) -> Space {
        let mut p = Partition::new(1, 1, 1);
        p.replicas = replicas.to_vec();
        let space = Space {
            id: 1,
            db_id: 1,
            name: "s".to_string(),
            partition_num: 1,
            replica_num: replicas.len() as u8,
            fields: vec![Field {
                name: "emb".to_string(),
                field_type: FieldType::Vector,
                dimension: Some(4),
                index: None,
            }],
            index: None,
            partition_rule: None,
            partitions: vec![p],
            enabled: true,
            version: 1,
            resource_name: "default".to_string(),
        };
        f.meta.put_space(&space).await.unwrap();
        for id in replicas {
            f.plane
                .create_partition(&format!("10.0.0.{id}:8081"), &space, 1)
                .await
                .unwrap();
        }
        space
    }

    #[tokio::test]
    async fn healthy_space_is_green() {
        let f = fixture(&[1, 2]).await;
        let s = space(&f, &[1, 2]).await;
        let info = f.health.describe_space(&s, false).await.unwrap();
        assert_eq!(info.status, HealthLevel::Green);
        assert_eq!(info.partitions.len(), 1);
        assert!(info.errors.is_empty());
    }

    #[tokio::test]
    async fn down_follower_is_yellow() {
        let f = fixture(&[1, 2]).await;
        let s = space(&f, &[1, 2]).await;
        f.plane.set_live("10.0.0.2:8081", false);
        let info = f.health.describe_space(&s, false).await.unwrap();
        assert_eq!(info.status, HealthLevel::Yellow);
    }

    #[tokio::test]
    async fn down_leader_is_red() {
        let f = fixture(&[1, 2]).await;
        let s = space(&f, &[1, 2]).await;
        f.plane.set_live("10.0.0.1:8081", false);
        let info = f.health.describe_space(&s, false).await.unwrap();
        assert_eq!(info.status, HealthLevel::Red);
        assert!(!info.errors.is_empty());
    }

    #[tokio::test]
    async fn missing_partition_record_is_red() {
        let f = fixture(&[1]).await;
        let s = space(&f, &[1]).await;
        f.meta.store().delete(&keys::partition(1)).await.unwrap();
        let info = f.health.describe_space(&s, false).await.unwrap();
        assert_eq!(info.status, HealthLevel::Red);
        assert!(info.partitions.is_empty());
    }

    #[tokio::test]
    async fn cluster_takes_worst_db() {
        let f = fixture(&[1, 2]).await;
        let _ = space(&f, &[1, 2]).await;
        let db = Db { id: 1, name: "db".to_string(), ps: vec![] };
        f.meta.store().put(&keys::db_name("db"), b"1").await.unwrap();
        f.meta.put_json(&keys::db_body(1), &db).await.unwrap();
        f.plane.set_live("10.0.0.2:8081", false);

        let cluster = f.health.describe_cluster(&[], &[], false).await.unwrap();
        assert_eq!(cluster.dbs.len(), 1);
        assert_eq!(cluster.dbs[0].space_num, 1);
        assert_eq!(cluster.status, HealthLevel::Yellow);

        let missing = f
            .health
            .describe_cluster(&["nope".to_string()], &[], false)
            .await;
        assert!(matches!(missing, Err(HealthError::DbNotFound(_))));
    }
}
