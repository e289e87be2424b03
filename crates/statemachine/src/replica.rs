//! In-process host driving one state machine of any variant.
//!
//! `Replica` enforces the calling rules the three contracts rely on:
//!
//! - updates are applied one at a time, in gap-free index order, under the
//!   update gate;
//! - lookups on a regular machine wait for the machine mutex, while
//!   concurrent and on-disk machines are queried without host locking;
//! - a snapshot is prepared under the update gate and then streamed outside
//!   it, so updates keep flowing while a concurrent or on-disk machine saves.
//!   A regular machine blocks updates for the whole save.

use crate::config::ReplicaConfig;
use crate::machine::{ConcurrentStateMachine, OnDiskStateMachine, RegularStateMachine};
use crate::result::{Applied, SnapshotSaved};
use crate::snapshotter::{SnapshotMeta, Snapshotter};
use common::{GroupId, ReplicaId, RsmError, RsmResult, StateMachineKind};
use parking_lot::Mutex;
use snapshot::{SnapshotFile, SnapshotFileCollection, StopSignal};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};

/// A committed log entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    pub index: u64,
    pub cmd: Vec<u8>,
}

impl Entry {
    pub fn new(index: u64, cmd: impl Into<Vec<u8>>) -> Self {
        Self {
            index,
            cmd: cmd.into(),
        }
    }
}

/// A prepared snapshot waiting to be written. Owns the prepared context, so
/// dropping it without calling it releases the context.
type SaveFn<'a> = Box<
    dyn FnOnce(&mut dyn Write, &mut SnapshotFileCollection, &StopSignal) -> RsmResult<SnapshotSaved>
        + 'a,
>;

/// `ConcurrentStateMachine` with its context type hidden behind `SaveFn`.
trait ConcurrentMachine<Q, R>: Send + Sync {
    fn update(&self, cmd: &[u8]) -> RsmResult<Applied>;
    fn lookup(&self, query: &Q) -> RsmResult<R>;
    fn hash(&self) -> u64;
    fn prepare(&self) -> RsmResult<SaveFn<'_>>;
    fn recover(&self, reader: &mut dyn Read, files: &[SnapshotFile], stop: &StopSignal)
        -> RsmResult<()>;
}

impl<M: ConcurrentStateMachine> ConcurrentMachine<M::Query, M::Response> for M {
    fn update(&self, cmd: &[u8]) -> RsmResult<Applied> {
        ConcurrentStateMachine::update(self, cmd)
    }

    fn lookup(&self, query: &M::Query) -> RsmResult<M::Response> {
        ConcurrentStateMachine::lookup(self, query)
    }

    fn hash(&self) -> u64 {
        ConcurrentStateMachine::hash(self)
    }

    fn prepare(&self) -> RsmResult<SaveFn<'_>> {
        let ctx = self.prepare_snapshot()?;
        Ok(Box::new(
            move |w: &mut dyn Write, files: &mut SnapshotFileCollection, stop: &StopSignal| {
                self.save_snapshot(ctx, w, files, stop)
            },
        ))
    }

    fn recover(
        &self,
        reader: &mut dyn Read,
        files: &[SnapshotFile],
        stop: &StopSignal,
    ) -> RsmResult<()> {
        self.recover_from_snapshot(reader, files, stop)
    }
}

/// `OnDiskStateMachine` with its context type hidden behind `SaveFn`.
trait DiskMachine<Q, R>: Send + Sync {
    fn open(&self, stop: &StopSignal) -> RsmResult<u64>;
    fn update(&self, cmd: &[u8], index: u64) -> RsmResult<Applied>;
    fn lookup(&self, query: &Q) -> RsmResult<R>;
    fn sync(&self) -> RsmResult<()>;
    fn hash(&self) -> u64;
    fn prepare(&self) -> RsmResult<SaveFn<'_>>;
    fn recover(&self, reader: &mut dyn Read, stop: &StopSignal) -> RsmResult<()>;
}

impl<M: OnDiskStateMachine> DiskMachine<M::Query, M::Response> for M {
    fn open(&self, stop: &StopSignal) -> RsmResult<u64> {
        OnDiskStateMachine::open(self, stop)
    }

    fn update(&self, cmd: &[u8], index: u64) -> RsmResult<Applied> {
        OnDiskStateMachine::update(self, cmd, index)
    }

    fn lookup(&self, query: &M::Query) -> RsmResult<M::Response> {
        OnDiskStateMachine::lookup(self, query)
    }

    fn sync(&self) -> RsmResult<()> {
        OnDiskStateMachine::sync(self)
    }

    fn hash(&self) -> u64 {
        OnDiskStateMachine::hash(self)
    }

    fn prepare(&self) -> RsmResult<SaveFn<'_>> {
        let ctx = self.prepare_snapshot()?;
        Ok(Box::new(
            move |w: &mut dyn Write, _files: &mut SnapshotFileCollection, stop: &StopSignal| {
                self.save_snapshot(ctx, w, stop)
            },
        ))
    }

    fn recover(&self, reader: &mut dyn Read, stop: &StopSignal) -> RsmResult<()> {
        self.recover_from_snapshot(reader, stop)
    }
}

enum Managed<Q, R> {
    Regular(Mutex<Box<dyn RegularStateMachine<Query = Q, Response = R>>>),
    Concurrent(Box<dyn ConcurrentMachine<Q, R>>),
    OnDisk(Box<dyn DiskMachine<Q, R>>),
}

impl<Q, R> Managed<Q, R> {
    fn kind(&self) -> StateMachineKind {
        match self {
            Managed::Regular(_) => StateMachineKind::Regular,
            Managed::Concurrent(_) => StateMachineKind::Concurrent,
            Managed::OnDisk(_) => StateMachineKind::OnDisk,
        }
    }
}

/// One replica of a group: a state machine plus its snapshot store.
pub struct Replica<Q, R> {
    config: ReplicaConfig,
    machine: Managed<Q, R>,
    /// Serializes updates, prepares and recoveries.
    gate: Mutex<()>,
    applied: AtomicU64,
    opened: AtomicBool,
    /// Index an on-disk machine reported from its own `open`. Kept so a
    /// replica open that failed later on can be retried.
    persisted: Mutex<Option<u64>>,
    snapshotter: Snapshotter,
    stop: StopSignal,
}

impl<Q, R> Replica<Q, R> {
    fn with_machine(config: ReplicaConfig, machine: Managed<Q, R>) -> RsmResult<Self> {
        let snapshotter = Snapshotter::open(
            config.snapshot_dir(),
            config.group_id,
            config.replica_id,
            config.storage.snapshots_to_keep,
        )?;
        Ok(Self {
            config,
            machine,
            gate: Mutex::new(()),
            applied: AtomicU64::new(0),
            opened: AtomicBool::new(false),
            persisted: Mutex::new(None),
            snapshotter,
            stop: StopSignal::new(),
        })
    }

    pub fn regular<M>(config: ReplicaConfig, machine: M) -> RsmResult<Self>
    where
        M: RegularStateMachine<Query = Q, Response = R> + 'static,
    {
        Self::with_machine(config, Managed::Regular(Mutex::new(Box::new(machine))))
    }

    pub fn concurrent<M>(config: ReplicaConfig, machine: M) -> RsmResult<Self>
    where
        M: ConcurrentStateMachine<Query = Q, Response = R> + 'static,
    {
        Self::with_machine(config, Managed::Concurrent(Box::new(machine)))
    }

    pub fn on_disk<M>(config: ReplicaConfig, machine: M) -> RsmResult<Self>
    where
        M: OnDiskStateMachine<Query = Q, Response = R> + 'static,
    {
        Self::with_machine(config, Managed::OnDisk(Box::new(machine)))
    }

    pub fn group_id(&self) -> GroupId {
        self.config.group_id
    }

    pub fn replica_id(&self) -> ReplicaId {
        self.config.replica_id
    }

    pub fn kind(&self) -> StateMachineKind {
        self.machine.kind()
    }

    pub fn config(&self) -> &ReplicaConfig {
        &self.config
    }

    pub fn snapshotter(&self) -> &Snapshotter {
        &self.snapshotter
    }

    /// Index of the last entry reflected in the machine's state.
    pub fn applied_index(&self) -> u64 {
        self.applied.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> RsmResult<()> {
        if self.opened.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(RsmError::NotOpened)
        }
    }

    /// Bring the machine up and return its applied index.
    ///
    /// An on-disk machine reports what it persisted; any machine then
    /// recovers the newest local snapshot if it is ahead of that. A failed
    /// open leaves the machine as it was and may be retried; an on-disk
    /// machine is only opened once.
    pub fn open(&self) -> RsmResult<u64> {
        let _gate = self.gate.lock();
        if self.opened.load(Ordering::Acquire) {
            return Err(RsmError::Open("replica already opened".into()));
        }

        let persisted = match &self.machine {
            Managed::OnDisk(m) => {
                let mut persisted = self.persisted.lock();
                match *persisted {
                    Some(index) => index,
                    None => {
                        let index = m.open(&self.stop)?;
                        *persisted = Some(index);
                        index
                    }
                }
            }
            _ => 0,
        };
        self.applied.store(persisted, Ordering::Release);

        if let Some(meta) = self.snapshotter.latest()? {
            if meta.index > persisted {
                self.recover_from(&meta)?;
            }
        }

        self.opened.store(true, Ordering::Release);
        let applied = self.applied_index();
        info!(
            group = %self.config.group_id,
            replica = %self.config.replica_id,
            kind = %self.kind(),
            applied,
            "Replica opened"
        );
        Ok(applied)
    }

    /// Apply committed entries in order. Each entry must directly follow the
    /// applied index; any error is fatal to the replica.
    pub fn apply(&self, entries: &[Entry]) -> RsmResult<Vec<Applied>> {
        self.ensure_open()?;
        let _gate = self.gate.lock();

        let mut results = Vec::with_capacity(entries.len());
        for entry in entries {
            let expected = self.applied_index() + 1;
            if entry.index != expected {
                error!(expected, actual = entry.index, "Log index gap");
                return Err(RsmError::IndexGap {
                    expected,
                    actual: entry.index,
                });
            }

            let result = match &self.machine {
                Managed::Regular(m) => m.lock().update(&entry.cmd),
                Managed::Concurrent(m) => m.update(&entry.cmd),
                Managed::OnDisk(m) => m.update(&entry.cmd, entry.index),
            };
            let applied = result.inspect_err(|e| {
                error!(index = entry.index, error = %e, "Update failed");
            })?;

            self.applied.store(entry.index, Ordering::Release);
            results.push(applied);
        }
        debug!(count = entries.len(), applied = self.applied_index(), "Applied entries");
        Ok(results)
    }

    pub fn lookup(&self, query: &Q) -> RsmResult<R> {
        self.ensure_open()?;
        match &self.machine {
            Managed::Regular(m) => m.lock().lookup(query),
            Managed::Concurrent(m) => m.lookup(query),
            Managed::OnDisk(m) => m.lookup(query),
        }
    }

    pub fn hash(&self) -> u64 {
        match &self.machine {
            Managed::Regular(m) => m.lock().hash(),
            Managed::Concurrent(m) => m.hash(),
            Managed::OnDisk(m) => m.hash(),
        }
    }

    /// Compare the local hash against one computed by another replica at the
    /// same applied index.
    pub fn verify_hash(&self, expected: u64) -> RsmResult<()> {
        let _gate = self.gate.lock();
        let actual = self.hash();
        if actual != expected {
            error!(
                group = %self.config.group_id,
                replica = %self.config.replica_id,
                applied = self.applied_index(),
                expected,
                actual,
                "State divergence detected"
            );
            return Err(RsmError::Divergence { expected, actual });
        }
        Ok(())
    }

    /// Flush an on-disk machine. Other variants keep nothing to flush.
    pub fn sync(&self) -> RsmResult<()> {
        self.ensure_open()?;
        match &self.machine {
            Managed::OnDisk(m) => m.sync(),
            _ => Ok(()),
        }
    }

    /// Snapshot the applied state into the local store.
    pub fn save_snapshot(&self) -> RsmResult<SnapshotMeta> {
        self.save_snapshot_with(&self.stop)
    }

    /// Like [`Replica::save_snapshot`] with a caller-owned stop signal, so a
    /// single save can be abandoned without stopping the replica.
    pub fn save_snapshot_with(&self, stop: &StopSignal) -> RsmResult<SnapshotMeta> {
        self.ensure_open()?;
        let kind = self.kind();

        let (index, save): (u64, SaveFn<'_>) = match &self.machine {
            Managed::Regular(m) => {
                let _gate = self.gate.lock();
                let index = self.applied_index();
                let machine = m.lock();
                return self.snapshotter.save(
                    kind,
                    index,
                    |w: &mut dyn Write, files: &mut SnapshotFileCollection| {
                        machine.save_snapshot(w, files, stop)
                    },
                );
            }
            Managed::Concurrent(m) => {
                let _gate = self.gate.lock();
                (self.applied_index(), m.prepare()?)
            }
            Managed::OnDisk(m) => {
                let _gate = self.gate.lock();
                (self.applied_index(), m.prepare()?)
            }
        };

        self.snapshotter.save(
            kind,
            index,
            |w: &mut dyn Write, files: &mut SnapshotFileCollection| save(w, files, stop),
        )
    }

    /// Recover the newest local snapshot if it is ahead of the applied index.
    /// Returns the index recovered to, if any.
    pub fn recover_latest(&self) -> RsmResult<Option<u64>> {
        let _gate = self.gate.lock();
        match self.snapshotter.latest()? {
            Some(meta) if meta.index > self.applied_index() => {
                self.recover_from(&meta)?;
                Ok(Some(meta.index))
            }
            _ => Ok(None),
        }
    }

    /// Ask in-flight and future snapshot work driven by this replica to stop.
    pub fn request_stop(&self) {
        self.stop.stop();
    }

    /// Caller holds the gate.
    fn recover_from(&self, meta: &SnapshotMeta) -> RsmResult<()> {
        if meta.kind != self.kind() {
            return Err(RsmError::SnapshotRecover(format!(
                "snapshot {} was taken from a {} machine",
                meta.index, meta.kind
            )));
        }
        let mut reader = self.snapshotter.open_reader(meta)?;
        let files = meta.external_files();
        match &self.machine {
            Managed::Regular(m) => m
                .lock()
                .recover_from_snapshot(&mut reader, &files, &self.stop),
            Managed::Concurrent(m) => m.recover(&mut reader, &files, &self.stop),
            Managed::OnDisk(m) => m.recover(&mut reader, &self.stop),
        }?;
        self.applied.store(meta.index, Ordering::Release);
        info!(
            group = %self.config.group_id,
            replica = %self.config.replica_id,
            index = meta.index,
            "Recovered from snapshot"
        );
        Ok(())
    }
}

impl<Q: 'static, R: 'static> Replica<Q, R> {
    /// Save a snapshot on tokio's blocking pool, leaving the caller free to
    /// keep applying entries.
    pub async fn save_snapshot_async(self: Arc<Self>) -> RsmResult<SnapshotMeta> {
        tokio::task::spawn_blocking(move || self.save_snapshot())
            .await
            .map_err(|e| RsmError::SnapshotSave(format!("snapshot task failed: {e}")))?
    }
}
