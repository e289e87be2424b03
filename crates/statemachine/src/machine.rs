//! The three state machine contracts.
//!
//! Each variant is its own trait because the variants differ in which
//! operations exist: only concurrent and on-disk machines have a two-phase
//! snapshot, and only on-disk machines are opened and synced.
//!
//! | variant      | `update`       | `lookup` runs                     | snapshot               |
//! |--------------|----------------|-----------------------------------|------------------------|
//! | regular      | `&mut self`    | between updates only              | save blocks updates    |
//! | concurrent   | `&self`, serial| concurrently with update/lookups  | prepare, then save     |
//! | on-disk      | `&self`, serial| concurrently with update/lookups  | prepare, then save     |
//!
//! Commands and queries are borrowed for the duration of the call only.
//! `update` errors are fatal to the hosting replica: replicated state must
//! never silently diverge, so there is no retry path for a failed update.

use crate::result::{Applied, SnapshotSaved};
use common::RsmResult;
use snapshot::{SnapshotFile, SnapshotFileCollection, StopSignal};
use std::io::{Read, Write};

/// State machine whose calls the host delivers strictly one at a time.
pub trait RegularStateMachine: Send {
    type Query;
    type Response;

    /// Apply one committed command.
    fn update(&mut self, cmd: &[u8]) -> RsmResult<Applied>;

    /// Answer a read-only query against everything applied so far.
    fn lookup(&self, query: &Self::Query) -> RsmResult<Self::Response>;

    /// Deterministic checksum of the applied state, compared across replicas.
    fn hash(&self) -> u64;

    /// Serialize the full applied state into `writer`, polling `stop`.
    fn save_snapshot(
        &self,
        writer: &mut dyn Write,
        files: &mut SnapshotFileCollection,
        stop: &StopSignal,
    ) -> RsmResult<SnapshotSaved>;

    /// Replace the applied state with the one encoded in `reader`.
    ///
    /// On any failure, including cancellation, the applied state must be
    /// left exactly as it was.
    fn recover_from_snapshot(
        &mut self,
        reader: &mut dyn Read,
        files: &[SnapshotFile],
        stop: &StopSignal,
    ) -> RsmResult<()>;
}

/// State machine that serves lookups while an update is being applied.
///
/// Updates are still serialized by the host. Implementations guard any data
/// shared between `update` and `lookup` so that a lookup observes either the
/// state before or after an update, never a partial one.
pub trait ConcurrentStateMachine: Send + Sync {
    type Query;
    type Response;
    /// Immutable point-in-time view produced by `prepare_snapshot`.
    type Context: Send;

    fn update(&self, cmd: &[u8]) -> RsmResult<Applied>;

    fn lookup(&self, query: &Self::Query) -> RsmResult<Self::Response>;

    /// Checksum computed against a consistent view of the state.
    fn hash(&self) -> u64;

    /// Capture the current state. Called by the host while no update runs.
    fn prepare_snapshot(&self) -> RsmResult<Self::Context>;

    /// Serialize a prepared view. Runs concurrently with updates; the
    /// context is consumed and dropped on every exit path.
    fn save_snapshot(
        &self,
        ctx: Self::Context,
        writer: &mut dyn Write,
        files: &mut SnapshotFileCollection,
        stop: &StopSignal,
    ) -> RsmResult<SnapshotSaved>;

    fn recover_from_snapshot(
        &self,
        reader: &mut dyn Read,
        files: &[SnapshotFile],
        stop: &StopSignal,
    ) -> RsmResult<()>;
}

/// State machine whose applied state lives in its own persistent storage.
///
/// Because the host can no longer rebuild state from its log alone, the
/// machine reports how far it got through `open` and persists that progress
/// together with the state.
pub trait OnDiskStateMachine: Send + Sync {
    type Query;
    type Response;
    /// Immutable view that also carries the applied index.
    type Context: Send;

    /// Open the underlying storage and return the applied index. Called once
    /// before any update. A cancelled open leaves nothing initialized.
    fn open(&self, stop: &StopSignal) -> RsmResult<u64>;

    /// Apply a command tagged with its log index. Indices strictly increase.
    fn update(&self, cmd: &[u8], index: u64) -> RsmResult<Applied>;

    fn lookup(&self, query: &Self::Query) -> RsmResult<Self::Response>;

    /// Make every update applied so far durable.
    fn sync(&self) -> RsmResult<()>;

    fn hash(&self) -> u64;

    fn prepare_snapshot(&self) -> RsmResult<Self::Context>;

    fn save_snapshot(
        &self,
        ctx: Self::Context,
        writer: &mut dyn Write,
        stop: &StopSignal,
    ) -> RsmResult<SnapshotSaved>;

    /// Restore state and applied index. Once this returns, a later `open`
    /// reports the restored index.
    fn recover_from_snapshot(&self, reader: &mut dyn Read, stop: &StopSignal) -> RsmResult<()>;
}
