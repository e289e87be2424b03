//! Snapshot I/O for replicated state machines.
//!
//! A state machine never talks to the disk or the network when it saves or
//! restores a snapshot. It is handed a sequential byte channel, a collection
//! for large external files, and a [`StopSignal`] it polls between chunks.
//!
//! # Snapshot File Format
//!
//! ```text
//! ┌────────────────────────────────────────┐
//! │ Header (32 bytes)                      │
//! │ ├─ magic: u32 (0x52534D53 "RSMS")      │
//! │ ├─ version: u16                        │
//! │ ├─ checksum_type: u8 (1 = CRC32)       │
//! │ ├─ kind: u8 (regular/concurrent/disk)  │
//! │ ├─ index: u64                          │
//! │ ├─ payload_len: u64                    │
//! │ ├─ payload_checksum: u32               │
//! │ └─ header_checksum: u32                │
//! ├────────────────────────────────────────┤
//! │ Payload (written by the state machine) │
//! └────────────────────────────────────────┘
//! ```
//!
//! The header carries no timestamp: two replicas snapshotting the same
//! applied state at the same index produce identical files.
//!
//! # Example
//!
//! ```
//! use snapshot::{SnapshotSink, SnapshotSource, StopSignal};
//!
//! let stop = StopSignal::new();
//! let mut buf: Vec<u8> = Vec::new();
//! let mut sink = SnapshotSink::new(&mut buf, &stop);
//! sink.write_u64(42).unwrap();
//! sink.write_bytes(b"hello").unwrap();
//! let written = sink.finish().unwrap();
//! assert_eq!(written, 8 + 8 + 5);
//!
//! let mut reader = &buf[..];
//! let mut source = SnapshotSource::new(&mut reader, &stop);
//! assert_eq!(source.read_u64().unwrap(), 42);
//! assert_eq!(source.read_bytes(1024).unwrap(), b"hello");
//! ```

pub mod channel;
pub mod error;
pub mod file;
pub mod files;
pub mod header;
pub mod stop;

pub use channel::{SnapshotSink, SnapshotSource, DEFAULT_CHUNK_SIZE};
pub use error::{SnapshotError, SnapshotResult};
pub use file::{SnapshotFileReader, SnapshotFileWriter};
pub use files::{SnapshotFile, SnapshotFileCollection};
pub use header::{ChecksumType, SnapshotHeader, HEADER_SIZE, SNAPSHOT_MAGIC, SNAPSHOT_VERSION};
pub use stop::StopSignal;
