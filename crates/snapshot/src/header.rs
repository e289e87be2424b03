//! Fixed-size header at the start of every snapshot file.

use crate::error::{SnapshotError, SnapshotResult};
use common::StateMachineKind;
use serde::{Deserialize, Serialize};

/// Magic bytes for snapshot validation: "RSMS" in ASCII
pub const SNAPSHOT_MAGIC: u32 = 0x52534D53;

/// Current snapshot format version
pub const SNAPSHOT_VERSION: u16 = 1;

/// Size of the encoded header in bytes
pub const HEADER_SIZE: usize = 32;

/// Bytes covered by the header checksum (everything but the checksum itself)
const CHECKED_LEN: usize = HEADER_SIZE - 4;

/// Checksum algorithm protecting header and payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChecksumType {
    Crc32,
}

impl ChecksumType {
    fn tag(self) -> u8 {
        match self {
            ChecksumType::Crc32 => 1,
        }
    }

    fn from_tag(tag: u8) -> SnapshotResult<Self> {
        match tag {
            1 => Ok(ChecksumType::Crc32),
            other => Err(SnapshotError::UnsupportedChecksum(other)),
        }
    }
}

/// Decoded snapshot header.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotHeader {
    pub version: u16,
    pub checksum_type: ChecksumType,
    pub kind: StateMachineKind,
    /// Log index reflected by the payload
    pub index: u64,
    /// Payload length in bytes
    pub payload_len: u64,
    /// CRC32 of the payload
    pub payload_checksum: u32,
}

impl SnapshotHeader {
    pub fn new(kind: StateMachineKind, index: u64, payload_len: u64, payload_checksum: u32) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            checksum_type: ChecksumType::Crc32,
            kind,
            index,
            payload_len,
            payload_checksum,
        }
    }

    /// Serialize the header to bytes.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&SNAPSHOT_MAGIC.to_le_bytes());
        buf[4..6].copy_from_slice(&self.version.to_le_bytes());
        buf[6] = self.checksum_type.tag();
        buf[7] = self.kind.tag();
        buf[8..16].copy_from_slice(&self.index.to_le_bytes());
        buf[16..24].copy_from_slice(&self.payload_len.to_le_bytes());
        buf[24..28].copy_from_slice(&self.payload_checksum.to_le_bytes());
        let header_checksum = crc32fast::hash(&buf[..CHECKED_LEN]);
        buf[28..32].copy_from_slice(&header_checksum.to_le_bytes());
        buf
    }

    /// Deserialize and validate the header.
    pub fn decode(buf: &[u8; HEADER_SIZE]) -> SnapshotResult<Self> {
        let magic = le_u32(buf, 0);
        if magic != SNAPSHOT_MAGIC {
            return Err(SnapshotError::BadMagic(magic));
        }

        let stored = le_u32(buf, 28);
        let computed = crc32fast::hash(&buf[..CHECKED_LEN]);
        if stored != computed {
            return Err(SnapshotError::ChecksumMismatch {
                what: "header",
                expected: stored,
                actual: computed,
            });
        }

        let version = u16::from_le_bytes([buf[4], buf[5]]);
        if version != SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion(version));
        }

        let checksum_type = ChecksumType::from_tag(buf[6])?;
        let kind = StateMachineKind::from_tag(buf[7])
            .ok_or_else(|| SnapshotError::Corrupt(format!("unknown state machine kind {}", buf[7])))?;

        Ok(Self {
            version,
            checksum_type,
            kind,
            index: le_u64(buf, 8),
            payload_len: le_u64(buf, 16),
            payload_checksum: le_u32(buf, 24),
        })
    }
}

fn le_u32(buf: &[u8], at: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(bytes)
}

fn le_u64(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(bytes)
}
