//! Partitions held on local storage.
//!
//! A data node keeps each partition in `{data_dir}/{partition_id}`. The
//! agent only needs to list those ids and remove one.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use vgrid_meta::PartitionId;

use crate::error::{AgentError, AgentResult};

pub trait LocalPartitions: Send + Sync {
    /// Ids of every partition stored locally, ascending.
    fn partition_ids(&self) -> AgentResult<Vec<PartitionId>>;

    /// Remove a partition's local data. Removing an absent partition succeeds.
    fn purge(&self, partition_id: PartitionId) -> AgentResult<()>;
}

/// Partition directories under one data root.
#[derive(Debug, Clone)]
pub struct DataDirPartitions {
    root: PathBuf,
}

impl DataDirPartitions {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl LocalPartitions for DataDirPartitions {
    fn partition_ids(&self) -> AgentResult<Vec<PartitionId>> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(AgentError::io(&self.root, e)),
        };

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| AgentError::io(&self.root, e))?;
            let is_dir = entry
                .file_type()
                .map_err(|e| AgentError::io(entry.path(), e))?
                .is_dir();
            if !is_dir {
                continue;
            }
            match entry.file_name().to_str().and_then(|n| n.parse().ok()) {
                Some(id) => ids.push(id),
                None => debug!(path = ?entry.path(), "ignoring non-partition directory"),
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    fn purge(&self, partition_id: PartitionId) -> AgentResult<()> {
        let path = self.root.join(partition_id.to_string());
        match std::fs::remove_dir_all(&path) {
            Ok(()) => {
                info!(partition_id, ?path, "local partition purged");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AgentError::io(path, e)),
        }
    }
}
