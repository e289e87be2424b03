//! Replica configuration.

use common::{Config, GroupId, ReplicaId};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for one replica of a replicated group.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReplicaConfig {
    /// Group this replica belongs to.
    pub group_id: GroupId,

    /// Identity of this replica within the group.
    pub replica_id: ReplicaId,

    /// Directory holding snapshots and any state machine owned files.
    pub data_dir: PathBuf,

    /// Storage tuning handed to snapshotter and on-disk machines.
    pub storage: Config,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            group_id: GroupId(1),
            replica_id: ReplicaId(1),
            data_dir: PathBuf::from("./rsm_data"),
            storage: Config::default(),
        }
    }
}

impl ReplicaConfig {
    /// Create a new replica configuration.
    pub fn new(group_id: GroupId, replica_id: ReplicaId, data_dir: PathBuf) -> Self {
        Self {
            group_id,
            replica_id,
            data_dir,
            ..Default::default()
        }
    }

    /// Replace the storage tuning.
    pub fn with_storage(mut self, storage: Config) -> Self {
        self.storage = storage;
        self
    }

    /// Set the number of bytes moved per snapshot I/O call.
    pub fn with_snapshot_chunk_size(mut self, bytes: usize) -> Self {
        self.storage.snapshot_chunk_size = bytes;
        self
    }

    /// Set how many completed snapshots are kept on disk.
    pub fn with_snapshots_to_keep(mut self, count: usize) -> Self {
        self.storage.snapshots_to_keep = count;
        self
    }

    /// Set the log size after which on-disk machines compact on `sync`.
    pub fn with_compaction_threshold(mut self, bytes: u64) -> Self {
        self.storage.compaction_threshold = bytes;
        self
    }

    /// Path to the snapshot directory.
    pub fn snapshot_dir(&self) -> PathBuf {
        self.data_dir.join("snapshots")
    }

    /// Path to the directory an on-disk state machine owns.
    pub fn machine_dir(&self) -> PathBuf {
        self.data_dir.join("machine")
    }

    /// Storage config rooted at `machine_dir()`, for on-disk machines.
    pub fn machine_storage(&self) -> Config {
        Config {
            data_dir: self.machine_dir(),
            ..self.storage.clone()
        }
    }
}
