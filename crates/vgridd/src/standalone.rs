//! Standalone mode: master plus in-process data nodes.
//!
//! Every node gets a partition directory under `{data_dir}/nodes/{id}`, a
//! slot in the in-process data plane, and its own heartbeat agent. The
//! data plane doubles as the master's partition-server client.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};
use vgrid_core::VgridConfig;
use vgrid_master::{MasterError, MasterService};
use vgrid_meta::{Db, Field, FieldType, MetaClient, Space};
use vgrid_node::{AgentSettings, DataDirPartitions, HeartbeatAgent, server_descriptor};
use vgrid_rpc::{LocalDataPlane, PartitionServerClient};

use crate::control_plane::{open_store, spawn_control_plane, wait_for_shutdown};

/// Database and space created once the nodes are up.
pub struct Bootstrap {
    pub db: String,
    pub partitions: u32,
    pub replicas: u8,
    pub dimension: u32,
}

pub async fn run_standalone(
    config: VgridConfig,
    data_dir: PathBuf,
    nodes: u64,
    health_interval: u64,
    bootstrap: Option<Bootstrap>,
) -> anyhow::Result<()> {
    info!(nodes, "vgrid daemon starting in standalone mode");
    anyhow::ensure!(nodes > 0 && nodes < 255, "--nodes must be between 1 and 254");

    let meta = open_store(&data_dir)?;
    let plane = Arc::new(LocalDataPlane::new(meta.clone()));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Data nodes ───────────────────────────────────────────────

    let settings = AgentSettings::from_config(&config);
    let mut handles = Vec::new();
    for node_id in 1..=nodes {
        let node_dir = data_dir.join("nodes").join(node_id.to_string());
        std::fs::create_dir_all(&node_dir)?;

        let server = server_descriptor(node_id, &format!("127.0.0.{node_id}"), &config);
        plane.add_node_with_dir(node_id, &server.rpc_addr(), node_dir.clone());

        let agent = HeartbeatAgent::new(
            meta.clone(),
            server,
            Arc::new(DataDirPartitions::new(node_dir)),
            settings.clone(),
        );
        let agent_shutdown = shutdown_rx.clone();
        handles.push(tokio::spawn(async move {
            if let Err(e) = agent.run(agent_shutdown).await {
                error!(node_id, error = %e, "heartbeat agent failed");
            }
        }));
    }
    info!(nodes, "data nodes started");

    // ── Control plane ────────────────────────────────────────────

    let client: Arc<dyn PartitionServerClient> = plane;
    let master = Arc::new(MasterService::new(meta.clone(), client, &config).with_shutdown(shutdown_rx.clone()));
    handles.extend(spawn_control_plane(
        &master,
        &config,
        Duration::from_secs(health_interval),
        &shutdown_rx,
    ));

    if let Some(bootstrap) = bootstrap {
        wait_for_servers(&meta, nodes as usize, Duration::from_secs(10)).await?;
        run_bootstrap(&master, &bootstrap).await?;
    }

    wait_for_shutdown(shutdown_tx, handles).await
}

async fn wait_for_servers(meta: &MetaClient, expected: usize, timeout: Duration) -> anyhow::Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let registered = meta.query_servers().await?.len();
        if registered >= expected {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            anyhow::bail!("only {registered} of {expected} data nodes registered");
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

async fn run_bootstrap(master: &MasterService, bootstrap: &Bootstrap) -> anyhow::Result<()> {
    let db = Db {
        id: 0,
        name: bootstrap.db.clone(),
        ps: vec![],
    };
    match master.create_db(db).await {
        Ok(db) => info!(db_id = db.id, name = %db.name, "bootstrap database created"),
        Err(MasterError::AlreadyExists(_)) => {
            info!(name = %bootstrap.db, "bootstrap database exists, skipping");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    }

    let space = Space {
        id: 0,
        db_id: 0,
        name: "default".to_string(),
        partition_num: bootstrap.partitions,
        replica_num: bootstrap.replicas,
        fields: vec![Field {
            name: "vector".to_string(),
            field_type: FieldType::Vector,
            dimension: Some(bootstrap.dimension),
            index: None,
        }],
        index: None,
        partition_rule: None,
        partitions: vec![],
        enabled: false,
        version: 0,
        resource_name: String::new(),
    };
    match master.create_space(&bootstrap.db, space).await {
        Ok(space) => info!(
            space_id = space.id,
            partitions = space.partitions.len(),
            replicas = space.replica_num,
            "bootstrap space created"
        ),
        Err(e) => warn!(error = %e, "bootstrap space not created"),
    }
    Ok(())
}
