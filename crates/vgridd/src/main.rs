//! vgridd: the vgrid daemon.
//!
//! Two modes:
//! - `master`: the control plane over a persistent metadata store, driving
//!   real data nodes over HTTP.
//! - `standalone`: master plus N in-process data nodes, each with its own
//!   heartbeat agent and partition directory. Useful for local development.
//!
//! # Usage
//!
//! ```text
//! vgridd master --config /etc/vgrid.toml --data-dir /var/lib/vgrid
//! vgridd standalone --nodes 3 --data-dir /tmp/vgrid --bootstrap demo
//! ```

mod control_plane;
mod standalone;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use vgrid_core::VgridConfig;

#[derive(Parser)]
#[command(name = "vgridd", about = "vgrid daemon")]
struct Cli {
    /// Path to vgrid.toml. Built-in defaults are used when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control plane against remote data nodes.
    Master {
        /// Directory for the metadata store. Overrides `global.data_dir`.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Seconds between cluster health summaries.
        #[arg(long, default_value = "30")]
        health_interval: u64,
    },

    /// Run the control plane and in-process data nodes in one process.
    Standalone {
        /// Number of data nodes to start.
        #[arg(long, default_value = "3")]
        nodes: u64,

        /// Directory for the metadata store and node partition directories.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Seconds between cluster health summaries.
        #[arg(long, default_value = "30")]
        health_interval: u64,

        /// Create a database of this name with one space on startup.
        #[arg(long)]
        bootstrap: Option<String>,

        #[arg(long, default_value = "2")]
        partitions: u32,

        #[arg(long, default_value = "1")]
        replicas: u8,

        /// Dimension of the bootstrap space's vector field.
        #[arg(long, default_value = "128")]
        dimension: u32,
    },

    /// Print the effective configuration as TOML.
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json)?;

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Master {
            data_dir,
            health_interval,
        } => {
            let data_dir = data_dir.unwrap_or_else(|| config.global.data_dir.clone());
            control_plane::run_master(config, data_dir, health_interval).await
        }
        Command::Standalone {
            nodes,
            data_dir,
            health_interval,
            bootstrap,
            partitions,
            replicas,
            dimension,
        } => {
            let data_dir = data_dir.unwrap_or_else(|| config.global.data_dir.clone());
            let bootstrap = bootstrap.map(|db| standalone::Bootstrap {
                db,
                partitions,
                replicas,
                dimension,
            });
            standalone::run_standalone(config, data_dir, nodes, health_interval, bootstrap).await
        }
        Command::Config => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

fn init_tracing(json: bool) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new("info,vgridd=debug,vgrid=debug")?,
    };
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<VgridConfig> {
    match path {
        Some(path) => VgridConfig::from_file(path),
        None => Ok(VgridConfig::default()),
    }
}
