//! Isolated replica environments.
//!
//! Each `TestContext` owns a temporary directory that holds the replica's
//! snapshots and any on-disk machine files. Everything is removed when the
//! context is dropped, so the context must outlive the replicas built from it.

use common::{Config, GroupId, ReplicaId, RsmResult};
use statemachine::{
    ConcurrentStateMachine, DiskKv, OnDiskStateMachine, RegularStateMachine, Replica,
    ReplicaConfig,
};
use std::path::Path;
use tempfile::TempDir;

/// A temporary data directory plus the replica configuration rooted in it.
///
/// # Example
///
/// ```
/// use statemachine::ConcurrentKv;
/// use testsupport::prelude::*;
///
/// let ctx = TestContext::new().unwrap();
/// let replica = ctx.concurrent(ConcurrentKv::default()).unwrap();
/// assert_eq!(replica.open().unwrap(), 0);
/// ```
pub struct TestContext {
    temp_dir: TempDir,
    config: ReplicaConfig,
}

impl TestContext {
    /// Create a context for group 1, replica 1.
    pub fn new() -> RsmResult<Self> {
        Self::for_replica(GroupId(1), ReplicaId(1))
    }

    pub fn for_replica(group_id: GroupId, replica_id: ReplicaId) -> RsmResult<Self> {
        let temp_dir = tempfile::tempdir()?;
        let config = ReplicaConfig::new(group_id, replica_id, temp_dir.path().to_path_buf());
        Ok(Self { temp_dir, config })
    }

    /// Adjust the replica configuration, e.g. to shrink chunk sizes.
    pub fn with_config(mut self, f: impl FnOnce(ReplicaConfig) -> ReplicaConfig) -> Self {
        self.config = f(self.config);
        self
    }

    pub fn data_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn config(&self) -> &ReplicaConfig {
        &self.config
    }

    /// Storage config for a machine that owns files in this context.
    pub fn machine_config(&self) -> Config {
        self.config.machine_storage()
    }

    /// A fresh `DiskKv` over this context's machine directory. Calling this
    /// again after dropping a replica simulates a restart.
    pub fn disk_kv(&self) -> DiskKv {
        DiskKv::new(&self.machine_config())
    }

    pub fn regular<M>(&self, machine: M) -> RsmResult<Replica<M::Query, M::Response>>
    where
        M: RegularStateMachine + 'static,
    {
        Replica::regular(self.config.clone(), machine)
    }

    pub fn concurrent<M>(&self, machine: M) -> RsmResult<Replica<M::Query, M::Response>>
    where
        M: ConcurrentStateMachine + 'static,
    {
        Replica::concurrent(self.config.clone(), machine)
    }

    pub fn on_disk<M>(&self, machine: M) -> RsmResult<Replica<M::Query, M::Response>>
    where
        M: OnDiskStateMachine + 'static,
    {
        Replica::on_disk(self.config.clone(), machine)
    }
}
