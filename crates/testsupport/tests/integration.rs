//! Integration tests demonstrating testsupport usage.

use common::Status;
use statemachine::{ConcurrentKv, HelloWorld, KvQuery, KvResponse, MemKv, RegularStateMachine};
use snapshot::{SnapshotFileCollection, StopSignal};
use std::sync::Arc;
use testsupport::prelude::*;
use testsupport::test_replica;

#[test]
fn test_counter_replica_with_fixtures() {
    test_replica!(ctx, replica, regular: HelloWorld::new());
    let results = replica.apply(&entries(1, &counter_commands(3))).unwrap();

    let values: Vec<u64> = results.iter().map(|a| a.value).collect();
    assert_eq!(values, vec![1, 2, 3]);
    assert_same_hash(replica.hash(), 3, "after A, B, C");
    assert!(ctx.data_dir().exists());
}

#[test]
fn test_sample_log_on_kv_replica() {
    test_replica!(_ctx, replica, concurrent: ConcurrentKv::default());
    replica.apply(&entries(1, &sample_kv_log())).unwrap();

    assert_eq!(
        replica.lookup(&KvQuery::Get(b"alpha".to_vec())).unwrap(),
        KvResponse::Value(Some(b"10".to_vec()))
    );
    assert_eq!(replica.lookup(&KvQuery::Len).unwrap(), KvResponse::Len(5));
}

#[test]
fn test_failing_writer_reports_save_failure() {
    let mut kv = MemKv::default();
    for cmd in bulk_kv_log(10) {
        kv.update(&cmd).unwrap();
    }

    let stop = StopSignal::new();
    let mut writer = FailingWriter::new(16);
    let result = kv.save_snapshot(&mut writer, &mut SnapshotFileCollection::new(), &stop);
    assert_status(&result, Status::SnapshotSaveFailed);
    assert_error_contains(&result, "short write");
}

#[test]
fn test_truncated_reader_leaves_state_alone() {
    let mut source = MemKv::default();
    for cmd in sample_kv_log() {
        source.update(&cmd).unwrap();
    }
    let stop = StopSignal::new();
    let mut payload: Vec<u8> = Vec::new();
    source
        .save_snapshot(&mut payload, &mut SnapshotFileCollection::new(), &stop)
        .unwrap();

    let mut target = MemKv::default();
    target.update(&put_cmd("keep", "me")).unwrap();
    let before = target.hash();

    let mut reader = TruncatedReader::new(&payload, payload.len() / 2);
    let result = target.recover_from_snapshot(&mut reader, &[], &stop);
    assert_status(&result, Status::SnapshotRecoverFailed);
    assert_same_hash(target.hash(), before, "after failed recovery");
}

#[test]
fn test_disk_replica_restart_through_context() {
    let ctx = TestContext::new().unwrap();
    {
        let replica = ctx.on_disk(ctx.disk_kv()).unwrap();
        replica.open().unwrap();
        replica.apply(&entries(1, &sample_kv_log())).unwrap();
        replica.sync().unwrap();
    }

    let replica = ctx.on_disk(ctx.disk_kv()).unwrap();
    assert_eq!(replica.open().unwrap(), sample_kv_log().len() as u64);
}

#[tokio::test]
async fn test_async_snapshot_from_context() {
    let ctx = TestContext::new().unwrap();
    let replica = Arc::new(ctx.concurrent(ConcurrentKv::default()).unwrap());
    replica.open().unwrap();
    replica.apply(&entries(1, &bulk_kv_log(20))).unwrap();

    let meta = Arc::clone(&replica).save_snapshot_async().await.unwrap();
    assert_eq!(meta.index, 20);
    assert!(meta.data_path().starts_with(ctx.data_dir()));
}
