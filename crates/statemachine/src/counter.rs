//! Counters: the smallest useful state machines.
//!
//! Every command, whatever its bytes, bumps the count by one. The applied
//! value is the new count, the hash is the count, and the snapshot payload is
//! the count as 8 little-endian bytes.

use crate::machine::{ConcurrentStateMachine, RegularStateMachine};
use crate::result::{Applied, SnapshotSaved};
use common::RsmResult;
use snapshot::{SnapshotFile, SnapshotFileCollection, SnapshotSink, SnapshotSource, StopSignal};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

fn write_count(count: u64, writer: &mut dyn Write, stop: &StopSignal) -> RsmResult<SnapshotSaved> {
    let mut sink = SnapshotSink::new(writer, stop);
    sink.write_u64(count).map_err(|e| e.into_save_error())?;
    let written = sink.finish().map_err(|e| e.into_save_error())?;
    Ok(SnapshotSaved::new(written))
}

fn read_count(reader: &mut dyn Read, stop: &StopSignal) -> RsmResult<u64> {
    let mut source = SnapshotSource::new(reader, stop);
    let count = source.read_u64().map_err(|e| e.into_recover_error())?;
    source.expect_end().map_err(|e| e.into_recover_error())?;
    Ok(count)
}

/// Regular counter.
#[derive(Debug, Default)]
pub struct HelloWorld {
    count: u64,
}

impl HelloWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

impl RegularStateMachine for HelloWorld {
    type Query = ();
    type Response = u64;

    fn update(&mut self, cmd: &[u8]) -> RsmResult<Applied> {
        self.count += 1;
        debug!(count = self.count, len = cmd.len(), "Counter updated");
        Ok(Applied::value(self.count))
    }

    fn lookup(&self, _query: &()) -> RsmResult<u64> {
        Ok(self.count)
    }

    fn hash(&self) -> u64 {
        self.count
    }

    fn save_snapshot(
        &self,
        writer: &mut dyn Write,
        _files: &mut SnapshotFileCollection,
        stop: &StopSignal,
    ) -> RsmResult<SnapshotSaved> {
        write_count(self.count, writer, stop)
    }

    fn recover_from_snapshot(
        &mut self,
        reader: &mut dyn Read,
        _files: &[SnapshotFile],
        stop: &StopSignal,
    ) -> RsmResult<()> {
        self.count = read_count(reader, stop)?;
        Ok(())
    }
}

/// Counter that serves lookups while updates run.
#[derive(Debug, Default)]
pub struct ConcurrentCounter {
    count: AtomicU64,
}

impl ConcurrentCounter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConcurrentStateMachine for ConcurrentCounter {
    type Query = ();
    type Response = u64;
    type Context = u64;

    fn update(&self, _cmd: &[u8]) -> RsmResult<Applied> {
        // Updates are serialized by the host, so load + store cannot race.
        let next = self.count.load(Ordering::Acquire) + 1;
        self.count.store(next, Ordering::Release);
        Ok(Applied::value(next))
    }

    fn lookup(&self, _query: &()) -> RsmResult<u64> {
        Ok(self.count.load(Ordering::Acquire))
    }

    fn hash(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

    fn prepare_snapshot(&self) -> RsmResult<u64> {
        Ok(self.count.load(Ordering::Acquire))
    }

    fn save_snapshot(
        &self,
        ctx: u64,
        writer: &mut dyn Write,
        _files: &mut SnapshotFileCollection,
        stop: &StopSignal,
    ) -> RsmResult<SnapshotSaved> {
        write_count(ctx, writer, stop)
    }

    fn recover_from_snapshot(
        &self,
        reader: &mut dyn Read,
        _files: &[SnapshotFile],
        stop: &StopSignal,
    ) -> RsmResult<()> {
        let count = read_count(reader, stop)?;
        self.count.store(count, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Status;

    #[test]
    fn three_updates_count_to_three() {
        let mut sm = HelloWorld::new();
        let results: Vec<u64> = [b"A", b"B", b"C"]
            .iter()
            .map(|cmd| sm.update(*cmd).unwrap().value)
            .collect();
        assert_eq!(results, vec![1, 2, 3]);
        assert_eq!(sm.hash(), 3);
        assert_eq!(sm.lookup(&()).unwrap(), 3);
    }

    #[test]
    fn snapshot_restores_into_fresh_instance() {
        let mut sm = HelloWorld::new();
        for cmd in [b"A", b"B", b"C"] {
            sm.update(cmd).unwrap();
        }

        let stop = StopSignal::new();
        let mut buf: Vec<u8> = Vec::new();
        let mut files = SnapshotFileCollection::new();
        let saved = sm.save_snapshot(&mut buf, &mut files, &stop).unwrap();
        assert_eq!(saved.bytes_written, 8);
        assert_eq!(buf, 3u64.to_le_bytes());
        assert!(files.is_empty());

        let mut fresh = HelloWorld::new();
        fresh.recover_from_snapshot(&mut &buf[..], &[], &stop).unwrap();
        assert_eq!(fresh.hash(), 3);
    }

    #[test]
    fn short_snapshot_leaves_state_unchanged() {
        let mut sm = HelloWorld::new();
        sm.update(b"x").unwrap();

        let stop = StopSignal::new();
        let truncated = [7u8, 0, 0];
        let result = sm.recover_from_snapshot(&mut &truncated[..], &[], &stop);
        assert_eq!(Status::of(&result), Status::SnapshotRecoverFailed);
        assert_eq!(sm.count(), 1);
    }

    #[test]
    fn stopped_save_is_cancelled() {
        let sm = HelloWorld::new();
        let stop = StopSignal::new();
        stop.stop();

        let mut buf: Vec<u8> = Vec::new();
        let result = sm.save_snapshot(&mut buf, &mut SnapshotFileCollection::new(), &stop);
        assert_eq!(Status::of(&result), Status::Cancelled);
        assert!(buf.is_empty());
    }

    #[test]
    fn concurrent_counter_snapshots_prepared_value() {
        let sm = ConcurrentCounter::new();
        sm.update(b"A").unwrap();
        sm.update(b"B").unwrap();
        let ctx = sm.prepare_snapshot().unwrap();
        assert_eq!(sm.update(b"C").unwrap().value, 3);

        let stop = StopSignal::new();
        let mut buf: Vec<u8> = Vec::new();
        sm.save_snapshot(ctx, &mut buf, &mut SnapshotFileCollection::new(), &stop)
            .unwrap();

        let restored = ConcurrentCounter::new();
        restored
            .recover_from_snapshot(&mut &buf[..], &[], &stop)
            .unwrap();
        assert_eq!(restored.hash(), 2);
        assert_eq!(sm.hash(), 3);
    }
}
