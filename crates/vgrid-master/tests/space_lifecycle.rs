//! Integration tests for space create, update, scale, ranges, and delete.

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use common::{Cluster, addr, fast_config, ranged_space_def, server, space_def, vector_field};
use vgrid_health::HealthLevel;
use vgrid_master::{ErrorCode, MasterService, RuleChange, SpaceUpdate};
use vgrid_meta::{Alias, Field, FieldType, RangeDef, keys};
use vgrid_rpc::RpcMethod;

// ── Create ────────────────────────────────────────────────────────

#[tokio::test]
async fn create_space_registers_enabled_space() {
    let cluster = Cluster::new(3).await;
    let db = cluster.create_db("docs").await;

    let space = cluster
        .master
        .create_space("docs", space_def("emb", 4, 1))
        .await
        .unwrap();

    assert!(space.enabled);
    assert_eq!(space.version, 1);
    assert_eq!(space.db_id, db.id);
    assert_eq!(space.resource_name, "default");
    let slots: Vec<_> = space.partitions.iter().map(|p| p.slot).collect();
    assert_eq!(slots, vec![0, 1_073_741_824, 2_147_483_648, 3_221_225_472]);

    let used: BTreeSet<_> = space.partitions.iter().flat_map(|p| p.replicas.clone()).collect();
    assert_eq!(used.len(), 3, "four partitions should spread over all three servers");

    for p in &space.partitions {
        let record = cluster.meta.query_partition(p.id).await.unwrap().unwrap();
        assert_eq!(record.replicas, p.replicas);
    }
    let stored = cluster.master.query_space("docs", "emb").await.unwrap();
    assert_eq!(stored, space);
}

#[tokio::test]
async fn duplicate_space_is_rejected() {
    let cluster = Cluster::new(1).await;
    cluster.create_db("docs").await;
    cluster
        .master
        .create_space("docs", space_def("emb", 1, 1))
        .await
        .unwrap();

    let err = cluster
        .master
        .create_space("docs", space_def("emb", 1, 1))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::AlreadyExists);
}

#[tokio::test]
async fn concurrent_creates_of_one_space_yield_one_winner() {
    let cluster = Cluster::new(2).await;
    cluster.create_db("docs").await;

    let (a, b) = tokio::join!(
        cluster.master.create_space("docs", space_def("emb", 2, 1)),
        cluster.master.create_space("docs", space_def("emb", 2, 1)),
    );
    let outcomes = [a, b];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    let loser = outcomes.into_iter().find_map(Result::err).unwrap();
    assert_eq!(loser.code(), ErrorCode::AlreadyExists);

    // Only the winner allocated a space id.
    let next = cluster
        .meta
        .new_id(keys::SEQ_SPACE, Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(next, 2);
}

#[tokio::test]
async fn failed_create_removes_all_metadata() {
    let cluster = Cluster::new(1).await;
    cluster.create_db("docs").await;
    cluster
        .plane
        .inject_failure(RpcMethod::CreatePartition, &addr(1), "disk full");

    let err = cluster
        .master
        .create_space("docs", space_def("emb", 2, 1))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::UpstreamUnavailable);

    let db = cluster.master.query_db("docs").await.unwrap();
    assert!(cluster.meta.query_space_by_name(db.id, "emb").await.unwrap().is_none());
    assert!(cluster.meta.query_partitions().await.unwrap().is_empty());

    cluster.plane.clear_failures();
    let space = cluster
        .master
        .create_space("docs", space_def("emb", 2, 1))
        .await
        .unwrap();
    assert!(space.enabled);
}

#[tokio::test]
async fn create_times_out_when_nodes_never_report() {
    let mut config = fast_config();
    config.master.lock_ttl_secs = 1;
    let cluster = Cluster::with_servers(vec![server(1, "z1")], config).await;
    cluster.create_db("docs").await;
    cluster.plane.set_silent(true);

    let err = cluster
        .master
        .create_space("docs", space_def("emb", 1, 1))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Timeout);

    let db = cluster.master.query_db("docs").await.unwrap();
    assert!(cluster.meta.query_space_by_name(db.id, "emb").await.unwrap().is_none());
}

#[tokio::test]
async fn shutdown_cancels_pending_create_and_removes_space() {
    let cluster = Cluster::new(2).await;
    let db = cluster.create_db("docs").await;
    cluster.plane.set_silent(true);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let master = MasterService::new(cluster.meta.clone(), Arc::new(cluster.plane.clone()), &fast_config())
        .with_shutdown(shutdown_rx);

    let (created, ()) = tokio::join!(master.create_space("docs", space_def("emb", 2, 1)), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(true).unwrap();
    });

    let err = created.unwrap_err();
    assert_eq!(err.code(), ErrorCode::InternalError);
    assert!(cluster.meta.query_space_by_name(db.id, "emb").await.unwrap().is_none());
    assert!(cluster.meta.query_all_spaces().await.unwrap().is_empty());
    assert_eq!(cluster.calls_of(RpcMethod::CreatePartition).len(), 2);
}

#[tokio::test]
async fn too_few_servers_fails_before_any_rpc() {
    let cluster = Cluster::new(2).await;
    cluster.create_db("docs").await;

    let err = cluster
        .master
        .create_space("docs", space_def("emb", 1, 3))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::CapacityError);
    assert!(cluster.calls_of(RpcMethod::CreatePartition).is_empty());
    assert!(cluster.meta.query_partitions().await.unwrap().is_empty());
}

#[tokio::test]
async fn zone_anti_affinity_limits_replicas() {
    let cluster = Cluster::zoned(&["a", "a", "b"]).await;
    cluster.create_db("docs").await;

    let err = cluster
        .master
        .create_space("docs", space_def("wide", 1, 3))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::CapacityError);

    let space = cluster
        .master
        .create_space("docs", space_def("emb", 2, 2))
        .await
        .unwrap();
    for p in &space.partitions {
        assert!(p.replicas.contains(&3), "every replica set needs the only zone-b server");
    }
}

#[tokio::test]
async fn invalid_definition_is_rejected() {
    let cluster = Cluster::new(1).await;
    cluster.create_db("docs").await;

    let mut space = space_def("emb", 1, 1);
    space.fields[0].dimension = None;
    let err = cluster.master.create_space("docs", space).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::ValidationError);

    let err = cluster
        .master
        .create_space("nope", space_def("emb", 1, 1))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);
}

// ── Update ────────────────────────────────────────────────────────

fn title_field() -> Field {
    Field {
        name: "title".to_string(),
        field_type: FieldType::String,
        dimension: None,
        index: None,
    }
}

#[tokio::test]
async fn update_merges_schema_and_bumps_version() {
    let cluster = Cluster::new(2).await;
    cluster.create_db("docs").await;
    cluster
        .master
        .create_space("docs", space_def("emb", 2, 1))
        .await
        .unwrap();
    cluster.plane.clear_calls();

    let updated = cluster
        .master
        .update_space(
            "docs",
            "emb",
            SpaceUpdate {
                fields: Some(vec![vector_field("emb"), title_field()]),
                ..SpaceUpdate::default()
            },
        )
        .await
        .unwrap();

    let names: Vec<_> = updated.fields.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["emb", "title"]);
    assert_eq!(updated.version, 2);
    assert_eq!(cluster.calls_of(RpcMethod::UpdatePartition).len(), 2);
}

#[tokio::test]
async fn update_rejects_structural_changes() {
    let cluster = Cluster::new(1).await;
    cluster.create_db("docs").await;
    cluster
        .master
        .create_space("docs", space_def("emb", 1, 1))
        .await
        .unwrap();

    let mut wider = vector_field("emb");
    wider.dimension = Some(16);
    let err = cluster
        .master
        .update_space(
            "docs",
            "emb",
            SpaceUpdate {
                fields: Some(vec![wider]),
                ..SpaceUpdate::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ValidationError);

    let err = cluster
        .master
        .update_space(
            "docs",
            "emb",
            SpaceUpdate {
                partition_num: Some(4),
                ..SpaceUpdate::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ValidationError);

    let stored = cluster.master.query_space("docs", "emb").await.unwrap();
    assert_eq!(stored.version, 1);
}

#[tokio::test]
async fn update_with_unreachable_leader_sends_nothing() {
    let cluster = Cluster::new(1).await;
    cluster.create_db("docs").await;
    cluster
        .master
        .create_space("docs", space_def("emb", 2, 1))
        .await
        .unwrap();
    cluster.plane.clear_calls();
    cluster.plane.set_live(&addr(1), false);

    let err = cluster
        .master
        .update_space(
            "docs",
            "emb",
            SpaceUpdate {
                enabled: Some(false),
                ..SpaceUpdate::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::UpstreamUnavailable);
    assert!(cluster.calls_of(RpcMethod::UpdatePartition).is_empty());
    assert!(cluster.master.query_space("docs", "emb").await.unwrap().enabled);
}

#[tokio::test]
async fn rename_onto_existing_space_conflicts() {
    let cluster = Cluster::new(1).await;
    cluster.create_db("docs").await;
    for name in ["a", "b"] {
        cluster
            .master
            .create_space("docs", space_def(name, 1, 1))
            .await
            .unwrap();
    }

    let err = cluster
        .master
        .update_space(
            "docs",
            "a",
            SpaceUpdate {
                name: Some("b".to_string()),
                ..SpaceUpdate::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::AlreadyExists);

    let renamed = cluster
        .master
        .update_space(
            "docs",
            "a",
            SpaceUpdate {
                name: Some("c".to_string()),
                ..SpaceUpdate::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(renamed.name, "c");
    assert!(cluster.master.query_space("docs", "a").await.is_err());
}

// ── Delete ────────────────────────────────────────────────────────

#[tokio::test]
async fn delete_space_removes_partitions_and_aliases() {
    let cluster = Cluster::new(2).await;
    cluster.create_db("docs").await;
    cluster
        .master
        .create_space("docs", space_def("emb", 2, 1))
        .await
        .unwrap();
    cluster
        .master
        .create_alias(Alias {
            name: "current".to_string(),
            db_name: "docs".to_string(),
            space_name: "emb".to_string(),
        })
        .await
        .unwrap();

    let err = cluster.master.delete_db("docs").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotEmpty);

    cluster.master.delete_space("docs", "emb").await.unwrap();
    assert!(cluster.meta.query_partitions().await.unwrap().is_empty());
    assert!(cluster.master.list_aliases().await.unwrap().is_empty());
    assert_eq!(cluster.calls_of(RpcMethod::DeletePartition).len(), 2);
    assert!(cluster.plane.hosted_partitions(&addr(1)).is_empty());

    // Deleting an absent space succeeds.
    cluster.master.delete_space("docs", "emb").await.unwrap();
    cluster.master.delete_db("docs").await.unwrap();
    assert!(cluster.master.list_dbs().await.unwrap().is_empty());
}

// ── Scale and ranges ──────────────────────────────────────────────

#[tokio::test]
async fn scale_out_adds_partitions_and_reslots() {
    let cluster = Cluster::new(2).await;
    cluster.create_db("docs").await;
    let before = cluster
        .master
        .create_space("docs", space_def("emb", 2, 1))
        .await
        .unwrap();

    let after = cluster.master.scale_space("docs", "emb", 4).await.unwrap();
    assert_eq!(after.partition_num, 4);
    assert_eq!(after.partitions.len(), 4);
    assert_eq!(after.version, before.version + 1);
    assert_eq!(after.partitions[0].id, before.partitions[0].id);
    let slots: Vec<_> = after.partitions.iter().map(|p| p.slot).collect();
    assert_eq!(slots, vec![0, 1_073_741_824, 2_147_483_648, 3_221_225_472]);
    assert_eq!(cluster.meta.query_partitions().await.unwrap().len(), 4);

    let err = cluster.master.scale_space("docs", "emb", 3).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::ValidationError);
}

#[tokio::test]
async fn failed_scale_out_keeps_space_unchanged() {
    let cluster = Cluster::new(1).await;
    cluster.create_db("docs").await;
    let before = cluster
        .master
        .create_space("docs", space_def("emb", 1, 1))
        .await
        .unwrap();
    cluster
        .plane
        .inject_failure(RpcMethod::CreatePartition, &addr(1), "disk full");

    let err = cluster.master.scale_space("docs", "emb", 3).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::UpstreamUnavailable);
    assert_eq!(cluster.master.query_space("docs", "emb").await.unwrap(), before);
    assert_eq!(cluster.meta.query_partitions().await.unwrap().len(), 1);
}

#[tokio::test]
async fn range_rule_add_and_drop() {
    let cluster = Cluster::new(2).await;
    cluster.create_db("docs").await;
    let space = cluster
        .master
        .create_space("docs", ranged_space_def("logs", 2, &[("p0", 100), ("p1", 200)]))
        .await
        .unwrap();
    assert_eq!(space.partitions.len(), 4);
    assert_eq!(space.partition_rule.as_ref().unwrap().partitions, 2);

    let err = cluster.master.scale_space("docs", "logs", 4).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::ValidationError);

    let grown = cluster
        .master
        .change_partition_rule(
            "docs",
            "logs",
            RuleChange::Add(vec![RangeDef {
                name: "p2".to_string(),
                value: 300,
            }]),
        )
        .await
        .unwrap();
    assert_eq!(grown.partitions.len(), 6);
    assert_eq!(grown.partition_rule.as_ref().unwrap().partitions, 3);
    assert_eq!(
        grown.partitions.iter().filter(|p| p.name.as_deref() == Some("p2")).count(),
        2
    );

    let err = cluster
        .master
        .change_partition_rule(
            "docs",
            "logs",
            RuleChange::Add(vec![RangeDef {
                name: "p3".to_string(),
                value: 250,
            }]),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ValidationError);

    let dropped_ids: Vec<_> = grown
        .partitions
        .iter()
        .filter(|p| p.name.as_deref() == Some("p0"))
        .map(|p| p.id)
        .collect();
    let shrunk = cluster
        .master
        .change_partition_rule("docs", "logs", RuleChange::Drop("p0".to_string()))
        .await
        .unwrap();
    assert_eq!(shrunk.partitions.len(), 4);
    assert!(shrunk.partitions.iter().all(|p| p.name.as_deref() != Some("p0")));
    for id in dropped_ids {
        assert!(cluster.meta.query_partition(id).await.unwrap().is_none());
    }

    let err = cluster
        .master
        .change_partition_rule("docs", "logs", RuleChange::Drop("zz".to_string()))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);
}

// ── Health ────────────────────────────────────────────────────────

#[tokio::test]
async fn describe_turns_yellow_when_a_follower_is_down() {
    let cluster = Cluster::new(2).await;
    cluster.create_db("docs").await;
    cluster
        .master
        .create_space("docs", space_def("emb", 1, 2))
        .await
        .unwrap();

    let info = cluster.master.describe_space("docs", "emb", false).await.unwrap();
    assert_eq!(info.status, HealthLevel::Green);
    assert!(info.errors.is_empty());

    // Replica order is [1, 2]; node 1 leads.
    cluster.plane.set_live(&addr(2), false);
    let info = cluster.master.describe_space("docs", "emb", false).await.unwrap();
    assert_eq!(info.status, HealthLevel::Yellow);
    assert_eq!(info.partitions[0].unreachable, vec![2]);

    let cluster_info = cluster.master.describe_cluster(&[], &[], false).await.unwrap();
    assert_eq!(cluster_info.status, HealthLevel::Yellow);
    assert_eq!(cluster_info.dbs.len(), 1);
}
