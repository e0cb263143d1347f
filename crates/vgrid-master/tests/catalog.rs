//! Integration tests for databases, aliases, users, roles, registration,
//! and cluster-wide operations.

mod common;

use std::collections::BTreeMap;

use common::{Cluster, addr, fast_config, server, space_def};
use vgrid_master::{ErrorCode, MasterService, PrivilegeChange, password_digest};
use vgrid_meta::{Alias, Db, MemberOp, Partition, Privilege, Role};
use vgrid_rpc::{BackupCommand, BackupRequest, ResourceLimits, RpcMethod};

fn db(name: &str, ps: &[&str]) -> Db {
    Db {
        id: 0,
        name: name.to_string(),
        ps: ps.iter().map(|s| s.to_string()).collect(),
    }
}

fn role(name: &str) -> Role {
    Role {
        name: name.to_string(),
        privileges: BTreeMap::from([("docs".to_string(), Privilege::ReadOnly)]),
    }
}

// ── Databases ─────────────────────────────────────────────────────

#[tokio::test]
async fn db_create_lookup_and_duplicates() {
    let cluster = Cluster::new(2).await;
    let created = cluster.create_db("docs").await;
    assert_eq!(created.id, 1);

    let err = cluster.master.create_db(db("docs", &[])).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::AlreadyExists);

    assert_eq!(cluster.master.query_db("docs").await.unwrap(), created);
    assert_eq!(cluster.master.query_db("1").await.unwrap(), created);
    assert_eq!(cluster.master.query_db("7").await.unwrap_err().code(), ErrorCode::NotFound);

    let err = cluster.master.create_db(db("bad name", &[])).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::ValidationError);
}

#[tokio::test]
async fn db_allow_list_must_name_live_servers() {
    let cluster = Cluster::new(2).await;

    let err = cluster
        .master
        .create_db(db("docs", &["10.9.9.9"]))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ValidationError);

    cluster.plane.set_live(&addr(2), false);
    let err = cluster
        .master
        .create_db(db("docs", &["10.0.0.2"]))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::UpstreamUnavailable);

    let created = cluster
        .master
        .create_db(db("docs", &["10.0.0.1"]))
        .await
        .unwrap();
    let servers = cluster.master.db_servers("docs").await.unwrap();
    assert_eq!(servers.len(), 1);
    assert_eq!(servers[0].id, 1);

    // Spaces of an allow-listed db only land on its servers.
    let space = cluster
        .master
        .create_space("docs", space_def("emb", 3, 1))
        .await
        .unwrap();
    assert!(space.partitions.iter().all(|p| p.replicas == vec![1]));

    cluster.plane.set_live(&addr(2), true);
    let updated = cluster
        .master
        .update_db_servers("docs", "10.0.0.2", MemberOp::Add)
        .await
        .unwrap();
    assert_eq!(updated.ps, vec!["10.0.0.1", "10.0.0.2"]);
    assert_eq!(updated.id, created.id);

    let updated = cluster
        .master
        .update_db_servers("docs", "10.0.0.1", MemberOp::Remove)
        .await
        .unwrap();
    assert_eq!(updated.ps, vec!["10.0.0.2"]);
    assert_eq!(cluster.master.query_db("docs").await.unwrap().ps, vec!["10.0.0.2"]);
}

#[tokio::test]
async fn limited_cluster_allows_one_db() {
    let mut config = fast_config();
    config.master.limited_db_num = true;
    let cluster = Cluster::with_servers(vec![server(1, "z1")], config).await;

    cluster.create_db("docs").await;
    let err = cluster.master.create_db(db("other", &[])).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::ValidationError);
}

// ── Aliases ───────────────────────────────────────────────────────

#[tokio::test]
async fn alias_lifecycle() {
    let cluster = Cluster::new(1).await;
    cluster.create_db("docs").await;
    for name in ["v1", "v2"] {
        cluster
            .master
            .create_space("docs", space_def(name, 1, 1))
            .await
            .unwrap();
    }
    let alias = Alias {
        name: "current".to_string(),
        db_name: "docs".to_string(),
        space_name: "v1".to_string(),
    };

    cluster.master.create_alias(alias.clone()).await.unwrap();
    let err = cluster.master.create_alias(alias.clone()).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::AlreadyExists);

    let dangling = Alias {
        name: "old".to_string(),
        space_name: "v0".to_string(),
        ..alias.clone()
    };
    let err = cluster.master.create_alias(dangling).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);

    let moved = Alias {
        space_name: "v2".to_string(),
        ..alias.clone()
    };
    cluster.master.update_alias(moved.clone()).await.unwrap();
    assert_eq!(cluster.master.query_alias("current").await.unwrap(), moved);

    cluster.master.delete_alias("current").await.unwrap();
    let err = cluster.master.delete_alias("current").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);
    let err = cluster.master.update_alias(moved).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);
}

// ── Users and roles ───────────────────────────────────────────────

#[tokio::test]
async fn users_store_digests_and_authenticate() {
    let cluster = Cluster::new(1).await;
    cluster.master.create_role(role("reader")).await.unwrap();

    let err = cluster
        .master
        .create_user("alice", "secret", "missing")
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);

    let user = cluster
        .master
        .create_user("alice", "secret", "reader")
        .await
        .unwrap();
    assert_eq!(user.password_digest, password_digest("secret"));
    assert_ne!(user.password_digest, "secret");

    let err = cluster
        .master
        .create_user("alice", "other", "reader")
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::AlreadyExists);

    let (found, found_role) = cluster.master.authenticate("alice", "secret").await.unwrap();
    assert_eq!(found.name, "alice");
    assert_eq!(found_role.name, "reader");
    assert!(cluster.master.authenticate("alice", "wrong").await.is_err());

    cluster
        .master
        .update_user("alice", Some("changed"), None)
        .await
        .unwrap();
    assert!(cluster.master.authenticate("alice", "secret").await.is_err());
    cluster.master.authenticate("alice", "changed").await.unwrap();

    let err = cluster.master.delete_role("reader").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::Conflict);

    cluster.master.delete_user("alice").await.unwrap();
    cluster.master.delete_role("reader").await.unwrap();
    assert!(cluster.master.list_users().await.unwrap().is_empty());
    assert!(cluster.master.list_roles().await.unwrap().is_empty());
}

#[tokio::test]
async fn role_changes_refresh_the_cache() {
    let cluster = Cluster::new(1).await;
    cluster.master.create_role(role("ops")).await.unwrap();

    cluster.master.query_role("ops").await.unwrap();
    assert!(cluster.master.role_cache().contains("ops"));

    let role = cluster
        .master
        .change_role_privileges(
            "ops",
            BTreeMap::from([("logs".to_string(), Privilege::WriteRead)]),
            PrivilegeChange::Grant,
        )
        .await
        .unwrap();
    assert_eq!(role.privileges.len(), 2);
    assert!(!cluster.master.role_cache().contains("ops"));

    let cached = cluster.master.query_role("ops").await.unwrap();
    assert_eq!(cached.privileges.get("logs"), Some(&Privilege::WriteRead));

    let role = cluster
        .master
        .change_role_privileges(
            "ops",
            BTreeMap::from([("docs".to_string(), Privilege::ReadOnly)]),
            PrivilegeChange::Revoke,
        )
        .await
        .unwrap();
    assert_eq!(role.privileges.keys().collect::<Vec<_>>(), vec!["logs"]);

    let err = cluster
        .master
        .change_role_privileges("nobody", BTreeMap::new(), PrivilegeChange::Grant)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);
}

// ── Registration ──────────────────────────────────────────────────

#[tokio::test]
async fn register_server_lists_hosted_partitions() {
    let cluster = Cluster::new(2).await;
    cluster.create_db("docs").await;
    let space = cluster
        .master
        .create_space("docs", space_def("emb", 2, 1))
        .await
        .unwrap();
    let on_node_1: Vec<_> = space
        .partitions
        .iter()
        .filter(|p| p.has_replica(1))
        .map(|p| p.id)
        .collect();

    let descriptor = cluster.master.register_server("10.0.0.1", 1).await.unwrap();
    assert_eq!(descriptor.partition_ids, on_node_1);
    assert_eq!(descriptor.rpc_port, 8081);
    assert_eq!(descriptor.resource_name, "default");

    let err = cluster.master.register_server("10.0.0.5", 1).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::Conflict);
    cluster.master.is_exist_node(1, "10.0.0.1").await.unwrap();
    cluster.master.is_exist_node(42, "10.0.0.42").await.unwrap();
}

#[tokio::test]
async fn register_partition_persists_record() {
    let cluster = Cluster::new(1).await;
    let mut partition = Partition::new(77, 1, 1);
    partition.replicas = vec![1];
    partition.leader_id = 1;

    cluster.master.register_partition(&partition).await.unwrap();
    assert_eq!(cluster.meta.query_partition(77).await.unwrap(), Some(partition));
}

// ── Cluster-wide ──────────────────────────────────────────────────

#[tokio::test]
async fn stats_report_unreachable_servers_as_entries() {
    let cluster = Cluster::new(3).await;
    cluster.plane.set_live(&addr(2), false);

    let stats = cluster.master.server_stats().await.unwrap();
    assert_eq!(stats.len(), 3);
    let addrs: Vec<_> = stats.iter().map(|s| s.addr.as_str()).collect();
    assert_eq!(addrs, vec![addr(1), addr(2), addr(3)]);
    assert!(stats[0].error.is_none());
    assert!(stats[1].error.is_some());
    assert_eq!(stats[2].node_id, 3);
}

#[tokio::test]
async fn engine_config_is_pushed_and_merged() {
    let cluster = Cluster::new(2).await;
    cluster.create_db("docs").await;
    cluster
        .master
        .create_space("docs", space_def("emb", 2, 1))
        .await
        .unwrap();

    let cfg = cluster.master.get_engine_cfg("docs", "emb").await.unwrap();
    assert_eq!(cfg, serde_json::json!({}));

    cluster
        .master
        .modify_engine_cfg("docs", "emb", serde_json::json!({"engine_cache_size": 1024, "path": null}))
        .await
        .unwrap();
    let merged = cluster
        .master
        .modify_engine_cfg("docs", "emb", serde_json::json!({"long_search_time": 30}))
        .await
        .unwrap();
    assert_eq!(
        merged,
        serde_json::json!({"engine_cache_size": 1024, "long_search_time": 30})
    );
    assert_eq!(cluster.master.get_engine_cfg("docs", "emb").await.unwrap(), merged);
    assert_eq!(cluster.calls_of(RpcMethod::UpdateEngineCfg).len(), 4);

    let err = cluster
        .master
        .modify_engine_cfg("docs", "emb", serde_json::json!([1, 2]))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ValidationError);
}

#[tokio::test]
async fn resource_limit_scopes() {
    let cluster = Cluster::new(1).await;
    let limits = ResourceLimits {
        memory_percent: Some(90.0),
        disk_percent: None,
    };

    let err = cluster.master.resource_limit(None, None, &limits).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);
    let err = cluster
        .master
        .resource_limit(None, Some("emb"), &limits)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ValidationError);

    cluster.create_db("docs").await;
    cluster
        .master
        .create_space("docs", space_def("emb", 2, 1))
        .await
        .unwrap();
    cluster.master.resource_limit(None, None, &limits).await.unwrap();
    cluster
        .master
        .resource_limit(Some("docs"), Some("emb"), &limits)
        .await
        .unwrap();
    assert_eq!(cluster.calls_of(RpcMethod::ResourceLimit).len(), 4);

    cluster
        .plane
        .inject_failure(RpcMethod::ResourceLimit, &addr(1), "memory over limit");
    let err = cluster
        .master
        .resource_limit(Some("docs"), None, &limits)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::UpstreamUnavailable);
}

#[tokio::test]
async fn backup_goes_to_each_partition_leader() {
    let cluster = Cluster::new(2).await;
    cluster.create_db("docs").await;
    cluster
        .master
        .create_space("docs", space_def("emb", 2, 2))
        .await
        .unwrap();
    cluster.plane.clear_calls();

    cluster
        .master
        .backup_space(&BackupRequest {
            command: BackupCommand::Create,
            db_name: "docs".to_string(),
            space_name: "emb".to_string(),
            location: "s3://bucket/docs".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(cluster.calls_of(RpcMethod::BackupSpace).len(), 2);
}

#[tokio::test]
async fn store_membership() {
    let cluster = Cluster::new(1).await;
    let master: &MasterService = &cluster.master;
    assert_eq!(master.members().await.unwrap().len(), 1);

    let err = master.add_member("meta-2", vec![]).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::ValidationError);

    master
        .add_member("meta-2", vec!["http://10.0.1.2:2380".to_string()])
        .await
        .unwrap();
    assert_eq!(master.members().await.unwrap().len(), 2);

    let err = master.remove_member("meta-9").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);
    master.remove_member("meta-2").await.unwrap();

    let only = master.members().await.unwrap().remove(0);
    let err = master.remove_member(&only.name).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::ValidationError);
}
