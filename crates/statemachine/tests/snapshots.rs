//! Snapshot save, recovery and cancellation through the replica host.

use common::{RsmError, RsmResult, Status};
use pretty_assertions::assert_eq;
use snapshot::{SnapshotFile, SnapshotFileCollection, SnapshotSink, SnapshotSource, StopSignal};
use statemachine::{
    Applied, ConcurrentKv, ConcurrentStateMachine, DiskKv, HelloWorld, KvQuery, KvResponse, MemKv,
    OnDiskStateMachine, RegularStateMachine, SnapshotSaved,
};
use std::fs;
use std::io::{Read, Write};
use std::path::PathBuf;
use tempfile::TempDir;
use testsupport::prelude::*;

/// Keeps its state in a blob that is shipped as an external snapshot file.
struct BlobMachine {
    blob: Vec<u8>,
    scratch: PathBuf,
}

impl BlobMachine {
    fn new(scratch: PathBuf) -> Self {
        Self {
            blob: Vec::new(),
            scratch,
        }
    }
}

impl RegularStateMachine for BlobMachine {
    type Query = ();
    type Response = Vec<u8>;

    fn update(&mut self, cmd: &[u8]) -> RsmResult<Applied> {
        self.blob.extend_from_slice(cmd);
        Ok(Applied::value(self.blob.len() as u64))
    }

    fn lookup(&self, _query: &()) -> RsmResult<Vec<u8>> {
        Ok(self.blob.clone())
    }

    fn hash(&self) -> u64 {
        crc32fast::hash(&self.blob) as u64
    }

    fn save_snapshot(
        &self,
        writer: &mut dyn Write,
        files: &mut SnapshotFileCollection,
        stop: &StopSignal,
    ) -> RsmResult<SnapshotSaved> {
        let path = self.scratch.join("blob.bin");
        fs::write(&path, &self.blob)
            .map_err(|e| RsmError::SnapshotSave(format!("write blob: {e}")))?;
        files
            .add_file(7, path.clone(), b"blob".to_vec())
            .map_err(|e| e.into_save_error())?;

        let mut sink = SnapshotSink::new(writer, stop);
        sink.write_u64(self.blob.len() as u64)
            .map_err(|e| e.into_save_error())?;
        let written = sink.finish().map_err(|e| e.into_save_error())?;
        Ok(SnapshotSaved::new(written))
    }

    fn recover_from_snapshot(
        &mut self,
        reader: &mut dyn Read,
        files: &[SnapshotFile],
        stop: &StopSignal,
    ) -> RsmResult<()> {
        let mut source = SnapshotSource::new(reader, stop);
        let len = source.read_u64().map_err(|e| e.into_recover_error())?;
        let file = files
            .iter()
            .find(|f| f.file_id == 7 && f.metadata == b"blob")
            .ok_or_else(|| RsmError::SnapshotRecover("blob file missing".into()))?;
        let blob = fs::read(file.path())
            .map_err(|e| RsmError::SnapshotRecover(format!("read blob: {e}")))?;
        if blob.len() as u64 != len {
            return Err(RsmError::SnapshotRecover("blob length mismatch".into()));
        }
        self.blob = blob;
        Ok(())
    }
}

#[test]
fn external_files_travel_with_the_snapshot() {
    let ctx = TestContext::new().unwrap();
    let scratch = TempDir::new().unwrap();
    {
        let replica = ctx
            .regular(BlobMachine::new(scratch.path().to_path_buf()))
            .unwrap();
        replica.open().unwrap();
        replica
            .apply(&entries(1, &[b"hello ".to_vec(), b"world".to_vec()]))
            .unwrap();
        let meta = replica.save_snapshot().unwrap();
        assert_eq!(meta.files.len(), 1);
    }

    // The scratch copy is gone; recovery must use the snapshot's own copy.
    fs::remove_file(scratch.path().join("blob.bin")).unwrap();

    let replica = ctx
        .regular(BlobMachine::new(scratch.path().to_path_buf()))
        .unwrap();
    assert_eq!(replica.open().unwrap(), 2);
    assert_eq!(replica.lookup(&()).unwrap(), b"hello world".to_vec());
}

#[test]
fn cancelled_save_leaves_no_snapshot_and_can_be_retried() {
    let ctx = TestContext::new().unwrap();
    let replica = ctx.concurrent(ConcurrentKv::default()).unwrap();
    replica.open().unwrap();
    replica.apply(&entries(1, &bulk_kv_log(30))).unwrap();

    let stop = StopSignal::new();
    stop.stop();
    assert_cancelled(&replica.save_snapshot_with(&stop));
    assert!(replica.snapshotter().list().unwrap().is_empty());

    // Updates keep flowing and a fresh attempt at a later index succeeds.
    replica.apply(&entries(31, &[put_cmd("late", "entry")])).unwrap();
    let meta = replica.save_snapshot().unwrap();
    assert_eq!(meta.index, 31);
}

#[test]
fn save_cancelled_midway_reports_cancelled() {
    let config = common::Config::builder().snapshot_chunk_size(16).build();
    let kv = ConcurrentKv::new(&config);
    for cmd in bulk_kv_log(40) {
        kv.update(&cmd).unwrap();
    }
    let before = kv.hash();

    let stop = StopSignal::new();
    let mut writer = StopAfterWriter::new(64, stop.clone());
    let view = kv.prepare_snapshot().unwrap();
    let result = kv.save_snapshot(view, &mut writer, &mut SnapshotFileCollection::new(), &stop);

    assert_cancelled(&result);
    assert!(writer.data.len() < 128);
    assert_same_hash(kv.hash(), before, "after cancelled save");
}

#[test]
fn cancelled_recovery_keeps_applied_state() {
    let mut source = MemKv::default();
    for cmd in bulk_kv_log(25) {
        source.update(&cmd).unwrap();
    }
    let mut payload: Vec<u8> = Vec::new();
    source
        .save_snapshot(&mut payload, &mut SnapshotFileCollection::new(), &StopSignal::new())
        .unwrap();

    let target = ConcurrentKv::default();
    for cmd in sample_kv_log() {
        target.update(&cmd).unwrap();
    }
    let before = target.hash();

    let stop = StopSignal::new();
    stop.stop();
    let result = target.recover_from_snapshot(&mut &payload[..], &[], &stop);
    assert_cancelled(&result);
    assert_same_hash(target.hash(), before, "after cancelled recovery");
    assert_eq!(target.lookup(&KvQuery::Len).unwrap(), KvResponse::Len(5));
}

#[test]
fn broken_reader_fails_recovery_without_side_effects() {
    let mut source = MemKv::default();
    for cmd in bulk_kv_log(10) {
        source.update(&cmd).unwrap();
    }
    let mut payload: Vec<u8> = Vec::new();
    source
        .save_snapshot(&mut payload, &mut SnapshotFileCollection::new(), &StopSignal::new())
        .unwrap();

    let mut target = MemKv::default();
    target.update(&put_cmd("mine", "1")).unwrap();
    let before = target.hash();

    let mut reader = BrokenReader::new(&payload, payload.len() - 1);
    let result = target.recover_from_snapshot(&mut reader, &[], &StopSignal::new());
    assert_status(&result, Status::SnapshotRecoverFailed);
    assert_same_hash(target.hash(), before, "after broken read");
}

#[test]
fn corrupted_snapshot_is_rejected_on_open() {
    let ctx = TestContext::new().unwrap();
    let meta = {
        let replica = ctx.regular(MemKv::default()).unwrap();
        replica.open().unwrap();
        replica.apply(&entries(1, &sample_kv_log())).unwrap();
        replica.save_snapshot().unwrap()
    };

    let mut bytes = fs::read(meta.data_path()).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    fs::write(meta.data_path(), bytes).unwrap();

    let replica = ctx.regular(MemKv::default()).unwrap();
    assert_status(&replica.open(), Status::SnapshotRecoverFailed);
}

#[test]
fn pruning_keeps_the_configured_number_of_snapshots() {
    let ctx = TestContext::new()
        .unwrap()
        .with_config(|config| config.with_snapshots_to_keep(2));
    let replica = ctx.regular(HelloWorld::new()).unwrap();
    replica.open().unwrap();

    for index in 1..=4u64 {
        replica.apply(&entries(index, &[b"x".to_vec()])).unwrap();
        replica.save_snapshot().unwrap();
    }

    let indexes: Vec<u64> = replica
        .snapshotter()
        .list()
        .unwrap()
        .iter()
        .map(|meta| meta.index)
        .collect();
    assert_eq!(indexes, vec![3, 4]);
}

#[test]
fn snapshot_replaces_divergent_state_on_recover_latest() {
    let leader_ctx = TestContext::new().unwrap();
    let leader = leader_ctx.concurrent(ConcurrentKv::default()).unwrap();
    leader.open().unwrap();
    leader.apply(&entries(1, &bulk_kv_log(12))).unwrap();
    let meta = leader.save_snapshot().unwrap();

    let follower_ctx = TestContext::new().unwrap();
    let follower = follower_ctx.concurrent(ConcurrentKv::default()).unwrap();
    follower.open().unwrap();
    follower.apply(&entries(1, &sample_kv_log()[..2])).unwrap();

    // Ship the leader's snapshot directory into the follower's store.
    let target = follower
        .snapshotter()
        .dir()
        .join(meta.dir.file_name().unwrap());
    fs::create_dir_all(&target).unwrap();
    for entry in fs::read_dir(&meta.dir).unwrap() {
        let path = entry.unwrap().path();
        fs::copy(&path, target.join(path.file_name().unwrap())).unwrap();
    }

    assert_eq!(follower.recover_latest().unwrap(), Some(12));
    assert_eq!(follower.applied_index(), 12);
    follower.verify_hash(leader.hash()).unwrap();
    assert_eq!(follower.recover_latest().unwrap(), None);
}

fn filled_disk_kv(kv: &DiskKv, log: &[Vec<u8>]) {
    kv.open(&StopSignal::new()).unwrap();
    for (i, cmd) in log.iter().enumerate() {
        kv.update(cmd, i as u64 + 1).unwrap();
    }
}

#[test]
fn disk_save_cancelled_midway_keeps_the_store() {
    let ctx = TestContext::new().unwrap();
    let config = common::Config::builder()
        .data_dir(ctx.machine_config().data_dir)
        .snapshot_chunk_size(16)
        .build();
    let hash = {
        let kv = DiskKv::new(&config);
        filled_disk_kv(&kv, &bulk_kv_log(40));
        let before = kv.hash();

        let stop = StopSignal::new();
        let mut writer = StopAfterWriter::new(64, stop.clone());
        let view = kv.prepare_snapshot().unwrap();
        assert_cancelled(&kv.save_snapshot(view, &mut writer, &stop));
        assert!(writer.data.len() < 128);
        assert_eq!(kv.applied_index(), 40);
        assert_same_hash(kv.hash(), before, "after cancelled save");

        kv.update(&put_cmd("after", "save"), 41).unwrap();
        kv.sync().unwrap();
        kv.hash()
    };

    let kv = DiskKv::new(&config);
    assert_eq!(kv.open(&StopSignal::new()).unwrap(), 41);
    assert_same_hash(kv.hash(), hash, "after restart");
}

#[test]
fn disk_recovery_cancelled_or_truncated_keeps_durable_state() {
    let source_ctx = TestContext::new().unwrap();
    let source = source_ctx.disk_kv();
    filled_disk_kv(&source, &bulk_kv_log(20));
    let mut payload: Vec<u8> = Vec::new();
    source
        .save_snapshot(source.prepare_snapshot().unwrap(), &mut payload, &StopSignal::new())
        .unwrap();

    let ctx = TestContext::new().unwrap();
    let applied = sample_kv_log().len() as u64;
    let hash = {
        let kv = ctx.disk_kv();
        filled_disk_kv(&kv, &sample_kv_log());
        kv.sync().unwrap();
        let before = kv.hash();

        let stop = StopSignal::new();
        stop.stop();
        assert_cancelled(&kv.recover_from_snapshot(&mut &payload[..], &stop));
        let mut truncated = TruncatedReader::new(&payload, payload.len() / 2);
        assert_status(
            &kv.recover_from_snapshot(&mut truncated, &StopSignal::new()),
            Status::SnapshotRecoverFailed,
        );

        assert_eq!(kv.applied_index(), applied);
        assert_same_hash(kv.hash(), before, "after failed recoveries");
        before
    };

    let kv = ctx.disk_kv();
    assert_eq!(kv.open(&StopSignal::new()).unwrap(), applied);
    assert_same_hash(kv.hash(), hash, "after restart");
}
