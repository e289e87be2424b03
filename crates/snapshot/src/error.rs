//! Snapshot channel errors.

use common::RsmError;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("cancelled")]
    Cancelled,
    #[error("short write: {written} of {expected} bytes accepted")]
    ShortWrite { expected: usize, written: usize },
    #[error("short read: {read} of {expected} bytes available")]
    ShortRead { expected: usize, read: usize },
    #[error("{what} checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        what: &'static str,
        expected: u32,
        actual: u32,
    },
    #[error("bad magic {0:#010x}")]
    BadMagic(u32),
    #[error("unsupported snapshot version {0}")]
    UnsupportedVersion(u16),
    #[error("unsupported checksum type {0}")]
    UnsupportedChecksum(u8),
    #[error("record of {len} bytes exceeds limit of {max}")]
    RecordTooLarge { len: u64, max: usize },
    #[error("duplicate external file id {0}")]
    DuplicateFile(u64),
    #[error("corrupt snapshot: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type SnapshotResult<T> = Result<T, SnapshotError>;

impl SnapshotError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SnapshotError::Cancelled)
    }

    /// Convert a failure raised while saving. Cancellation stays distinct
    /// from I/O failure because the host retries the two differently.
    pub fn into_save_error(self) -> RsmError {
        match self {
            SnapshotError::Cancelled => RsmError::Cancelled,
            other => RsmError::SnapshotSave(other.to_string()),
        }
    }

    /// Convert a failure raised while recovering.
    pub fn into_recover_error(self) -> RsmError {
        match self {
            SnapshotError::Cancelled => RsmError::Cancelled,
            other => RsmError::SnapshotRecover(other.to_string()),
        }
    }
}
