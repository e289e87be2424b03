//! Replicas fed the same command log must agree bit for bit.

use common::Config;
use proptest::prelude::*;
use snapshot::{SnapshotFileCollection, StopSignal};
use statemachine::{
    ConcurrentKv, ConcurrentStateMachine, DiskKv, MemKv, OnDiskStateMachine, RegularStateMachine,
};
use tempfile::TempDir;
use testsupport::proptest_generators::arb_command_log;

fn save_mem(kv: &MemKv) -> Vec<u8> {
    let mut buf: Vec<u8> = Vec::new();
    kv.save_snapshot(&mut buf, &mut SnapshotFileCollection::new(), &StopSignal::new())
        .unwrap();
    buf
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn every_variant_reaches_the_same_state(log in arb_command_log(40)) {
        let dir = TempDir::new().unwrap();
        let config = Config::builder().data_dir(dir.path().to_path_buf()).build();

        let mut mem = MemKv::default();
        let conc = ConcurrentKv::default();
        let disk = DiskKv::new(&config);
        disk.open(&StopSignal::new()).unwrap();

        for (i, cmd) in log.iter().enumerate() {
            let a = mem.update(cmd).unwrap();
            let b = conc.update(cmd).unwrap();
            let c = disk.update(cmd, i as u64 + 1).unwrap();
            prop_assert_eq!(&a, &b);
            prop_assert_eq!(&a, &c);
        }

        prop_assert_eq!(mem.hash(), conc.hash());
        prop_assert_eq!(mem.hash(), disk.hash());
    }

    #[test]
    fn independent_replicas_produce_identical_snapshots(log in arb_command_log(40)) {
        let mut first = MemKv::default();
        let mut second = MemKv::default();
        for cmd in &log {
            first.update(cmd).unwrap();
        }
        for cmd in &log {
            second.update(cmd).unwrap();
        }

        prop_assert_eq!(first.hash(), second.hash());
        prop_assert_eq!(save_mem(&first), save_mem(&second));
    }

    #[test]
    fn snapshot_round_trip_preserves_state(log in arb_command_log(40), chunk in 1usize..48) {
        let config = Config::builder().snapshot_chunk_size(chunk).build();
        let mut original = MemKv::new(&config);
        for cmd in &log {
            original.update(cmd).unwrap();
        }

        let payload = save_mem(&original);
        let mut restored = MemKv::new(&config);
        restored
            .recover_from_snapshot(&mut &payload[..], &[], &StopSignal::new())
            .unwrap();

        prop_assert_eq!(restored.hash(), original.hash());
        prop_assert_eq!(restored.state(), original.state());
    }

    #[test]
    fn concurrent_snapshot_matches_regular_snapshot(log in arb_command_log(30)) {
        let mut mem = MemKv::default();
        let conc = ConcurrentKv::default();
        for cmd in &log {
            mem.update(cmd).unwrap();
            conc.update(cmd).unwrap();
        }

        let mut buf: Vec<u8> = Vec::new();
        let view = conc.prepare_snapshot().unwrap();
        conc.save_snapshot(view, &mut buf, &mut SnapshotFileCollection::new(), &StopSignal::new())
            .unwrap();
        prop_assert_eq!(buf, save_mem(&mem));
    }
}
