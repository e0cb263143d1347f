//! Master mode: the control plane against remote data nodes.
//!
//! The daemon:
//! 1. Opens the metadata store under the data directory
//! 2. Builds the master service over the HTTP partition-server client
//! 3. Runs the fail-server watcher and a periodic health summary
//! 4. On ctrl-c, signals shutdown and waits for the loops to drain

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use vgrid_core::VgridConfig;
use vgrid_master::{FailServerWatcher, MasterService};
use vgrid_meta::{MetaClient, RedbMetaStore};
use vgrid_rpc::{HttpPartitionClient, PartitionServerClient};

pub async fn run_master(config: VgridConfig, data_dir: PathBuf, health_interval: u64) -> anyhow::Result<()> {
    info!("vgrid daemon starting in master mode");
    let meta = open_store(&data_dir)?;

    let client: Arc<dyn PartitionServerClient> = Arc::new(HttpPartitionClient::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let master = Arc::new(MasterService::new(meta, client, &config).with_shutdown(shutdown_rx.clone()));
    info!(resource = %config.global.resource_name, "master service initialized");

    let handles = spawn_control_plane(&master, &config, Duration::from_secs(health_interval), &shutdown_rx);
    wait_for_shutdown(shutdown_tx, handles).await
}

pub(crate) fn open_store(data_dir: &Path) -> anyhow::Result<MetaClient> {
    std::fs::create_dir_all(data_dir)?;
    let db_path = data_dir.join("meta.redb");
    let store = RedbMetaStore::open(&db_path)?;
    info!(path = ?db_path, "metadata store opened");
    Ok(MetaClient::new(Arc::new(store)))
}

/// Start the master's background loops.
pub(crate) fn spawn_control_plane(
    master: &Arc<MasterService>,
    config: &VgridConfig,
    health_interval: Duration,
    shutdown: &watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let watcher = FailServerWatcher::new(master.meta().clone(), config.master.fail_server_scan());
    let watcher_shutdown = shutdown.clone();
    let watcher_handle = tokio::spawn(async move {
        watcher.run(watcher_shutdown).await;
    });

    let health_master = Arc::clone(master);
    let health_shutdown = shutdown.clone();
    let health_handle = tokio::spawn(async move {
        report_health(health_master, health_interval, health_shutdown).await;
    });

    vec![watcher_handle, health_handle]
}

async fn report_health(master: Arc<MasterService>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                match master.describe_cluster(&[], &[], false).await {
                    Ok(info) => {
                        let spaces: usize = info.dbs.iter().map(|d| d.space_num).sum();
                        info!(status = ?info.status, dbs = info.dbs.len(), spaces, "cluster health");
                    }
                    Err(e) => warn!(error = %e, "cluster health check failed"),
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}

/// Block until ctrl-c, then stop every background task.
pub(crate) async fn wait_for_shutdown(
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
) -> anyhow::Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    for handle in handles {
        if let Err(e) = handle.await {
            warn!(error = %e, "background task panicked");
        }
    }
    info!("vgrid daemon stopped");
    Ok(())
}
