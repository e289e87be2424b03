//! Integration tests for snapshot files written through the channel.

use common::StateMachineKind;
use snapshot::{
    SnapshotError, SnapshotFileReader, SnapshotFileWriter, SnapshotHeader, SnapshotSink,
    SnapshotSource, StopSignal, HEADER_SIZE,
};
use std::fs::{self, OpenOptions};
use std::io::Write;
use tempfile::TempDir;

fn write_snapshot(dir: &TempDir, payload: &[u8]) -> std::path::PathBuf {
    let path = dir.path().join("snapshot.data");
    let stop = StopSignal::new();
    let mut writer = SnapshotFileWriter::create(&path).unwrap();
    {
        let mut sink = SnapshotSink::new(&mut writer, &stop).with_chunk_size(16);
        sink.write_bytes(payload).unwrap();
        sink.finish().unwrap();
    }
    writer.finish(StateMachineKind::Regular, 9).unwrap();
    path
}

#[test]
fn written_snapshot_reads_back() {
    let dir = TempDir::new().unwrap();
    let payload: Vec<u8> = (0..200u8).collect();
    let path = write_snapshot(&dir, &payload);

    let mut reader = SnapshotFileReader::open(&path).unwrap();
    assert_eq!(reader.header().index, 9);
    assert_eq!(reader.header().kind, StateMachineKind::Regular);
    assert_eq!(reader.header().payload_len, 8 + 200);

    let stop = StopSignal::new();
    let mut source = SnapshotSource::new(&mut reader, &stop);
    assert_eq!(source.read_bytes(1024).unwrap(), payload);
    source.expect_end().unwrap();
}

#[test]
fn identical_state_produces_identical_files() {
    let a = TempDir::new().unwrap();
    let b = TempDir::new().unwrap();
    let first = fs::read(write_snapshot(&a, b"same state")).unwrap();
    let second = fs::read(write_snapshot(&b, b"same state")).unwrap();
    assert_eq!(first, second);
}

#[test]
fn corrupted_payload_is_rejected_on_open() {
    let dir = TempDir::new().unwrap();
    let path = write_snapshot(&dir, b"important bytes");

    let mut bytes = fs::read(&path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;
    fs::write(&path, &bytes).unwrap();

    assert!(matches!(
        SnapshotFileReader::open(&path),
        Err(SnapshotError::ChecksumMismatch {
            what: "payload",
            ..
        })
    ));
    // The header alone is still readable for inspection.
    assert_eq!(SnapshotFileReader::read_header(&path).unwrap().index, 9);
}

#[test]
fn truncated_file_is_a_short_read() {
    let dir = TempDir::new().unwrap();
    let path = write_snapshot(&dir, &[1u8; 64]);
    let len = fs::metadata(&path).unwrap().len();
    OpenOptions::new()
        .write(true)
        .open(&path)
        .unwrap()
        .set_len(len - 10)
        .unwrap();

    assert!(matches!(
        SnapshotFileReader::open(&path),
        Err(SnapshotError::ShortRead { .. })
    ));
}

#[test]
fn trailing_garbage_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = write_snapshot(&dir, b"payload");
    OpenOptions::new()
        .append(true)
        .open(&path)
        .unwrap()
        .write_all(b"junk")
        .unwrap();

    assert!(matches!(
        SnapshotFileReader::open(&path),
        Err(SnapshotError::Corrupt(_))
    ));
}

#[test]
fn file_shorter_than_header_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tiny");
    fs::write(&path, [0u8; HEADER_SIZE - 1]).unwrap();
    assert!(matches!(
        SnapshotFileReader::open(&path),
        Err(SnapshotError::ShortRead { .. })
    ));
}

#[test]
fn absurd_payload_length_is_corrupt() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("huge");
    let header = SnapshotHeader::new(StateMachineKind::Regular, 1, u64::MAX, 0);
    fs::write(&path, header.encode()).unwrap();

    assert!(matches!(
        SnapshotFileReader::open(&path),
        Err(SnapshotError::Corrupt(_))
    ));
}
