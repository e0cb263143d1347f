//! vgrid.toml configuration parser.
//!
//! Every field has a default so a partial (or empty) file is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VgridConfig {
    pub global: GlobalConfig,
    pub master: MasterConfig,
    pub ps: PsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    pub name: String,
    /// Resource-class tag; spaces are only placed on servers with the same tag.
    pub resource_name: String,
    pub data_dir: PathBuf,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            name: "vgrid".to_string(),
            resource_name: "default".to_string(),
            data_dir: PathBuf::from("/var/lib/vgrid"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterConfig {
    /// TTL of the lock held by create/update/scale operations.
    pub lock_ttl_secs: u64,
    /// TTL of the lock held by delete-space.
    pub light_lock_ttl_secs: u64,
    pub id_timeout_ms: u64,
    /// Sleep between readiness polls while waiting for partition records.
    pub poll_interval_ms: u64,
    pub leader_retry_times: u32,
    pub leader_retry_backoff_ms: u64,
    pub fail_server_scan_secs: u64,
    pub stats_timeout_secs: u64,
    /// Allow at most one database in the cluster.
    pub limited_db_num: bool,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            lock_ttl_secs: 300,
            light_lock_ttl_secs: 60,
            id_timeout_ms: 5000,
            poll_interval_ms: 50,
            leader_retry_times: 10,
            leader_retry_backoff_ms: 10_000,
            fail_server_scan_secs: 15,
            stats_timeout_secs: 10,
            limited_db_num: false,
        }
    }
}

impl MasterConfig {
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    pub fn light_lock_ttl(&self) -> Duration {
        Duration::from_secs(self.light_lock_ttl_secs)
    }

    pub fn id_timeout(&self) -> Duration {
        Duration::from_millis(self.id_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn leader_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.leader_retry_backoff_ms)
    }

    pub fn fail_server_scan(&self) -> Duration {
        Duration::from_secs(self.fail_server_scan_secs)
    }

    pub fn stats_timeout(&self) -> Duration {
        Duration::from_secs(self.stats_timeout_secs)
    }
}

/// Granularity at which replicas of one partition are kept apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AntiAffinity {
    #[default]
    None,
    HostIp,
    Rack,
    Zone,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PsConfig {
    pub rpc_port: u16,
    pub raft_heartbeat_port: u16,
    pub raft_replicate_port: u16,
    /// Private servers only receive partitions of databases that list them.
    pub private: bool,
    pub replica_anti_affinity: AntiAffinity,
    pub raft_heartbeat_interval_ms: u64,
    /// Cooldown after a replica removal, as a multiple of the raft heartbeat.
    pub remove_cooldown_multiplier: u32,
    pub heartbeat_lease_ttl_secs: u64,
    pub resolver_refresh_ms: u64,
    pub reconnect_delay_ms: u64,
    pub host_ip: String,
    pub host_rack: String,
    pub host_zone: String,
}

impl Default for PsConfig {
    fn default() -> Self {
        Self {
            rpc_port: 8081,
            raft_heartbeat_port: 8898,
            raft_replicate_port: 8899,
            private: false,
            replica_anti_affinity: AntiAffinity::None,
            raft_heartbeat_interval_ms: 200,
            remove_cooldown_multiplier: 10,
            heartbeat_lease_ttl_secs: 10,
            resolver_refresh_ms: 1000,
            reconnect_delay_ms: 2000,
            host_ip: String::new(),
            host_rack: String::new(),
            host_zone: String::new(),
        }
    }
}

impl PsConfig {
    pub fn remove_cooldown(&self) -> Duration {
        Duration::from_millis(self.raft_heartbeat_interval_ms * u64::from(self.remove_cooldown_multiplier))
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.heartbeat_lease_ttl_secs)
    }

    pub fn resolver_refresh(&self) -> Duration {
        Duration::from_millis(self.resolver_refresh_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

impl VgridConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: VgridConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
