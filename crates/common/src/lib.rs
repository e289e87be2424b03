
pub mod pretty;

use serde::{Deserialize, Serialize};
use std::{fmt, io, path::PathBuf};
use thiserror::Error;

/// Identifier of a replicated group (the unit a consensus log replicates).
/// Examples:
/// - `let accounts = GroupId(1);`
/// - `let sessions = GroupId(42);`
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupId(pub u64);

/// Identifier of one replica within a group.
/// Examples:
/// - `let first = ReplicaId(1);`
/// - `let witness = ReplicaId(7);`
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReplicaId(pub u64);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// The three state machine variants a host can drive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateMachineKind {
    Regular,
    Concurrent,
    OnDisk,
}

impl StateMachineKind {
    /// Stable tag used in snapshot headers.
    pub fn tag(self) -> u8 {
        match self {
            StateMachineKind::Regular => 1,
            StateMachineKind::Concurrent => 2,
            StateMachineKind::OnDisk => 3,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(StateMachineKind::Regular),
            2 => Some(StateMachineKind::Concurrent),
            3 => Some(StateMachineKind::OnDisk),
            _ => None,
        }
    }
}

impl fmt::Display for StateMachineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StateMachineKind::Regular => "regular",
            StateMachineKind::Concurrent => "concurrent",
            StateMachineKind::OnDisk => "on-disk",
        };
        f.write_str(name)
    }
}

/// Status code returned to the host for every fallible state machine call.
///
/// The host applies one recovery policy per code: snapshot failures may be
/// retried with a fresh attempt, `Cancelled` is retried later, and `Fatal`
/// stops the replica because its state can no longer be trusted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Ok,
    SnapshotSaveFailed,
    SnapshotRecoverFailed,
    OpenFailed,
    SyncFailed,
    Cancelled,
    Fatal,
}

impl Status {
    /// Status code of an operation result.
    pub fn of<T>(result: &RsmResult<T>) -> Status {
        match result {
            Ok(_) => Status::Ok,
            Err(err) => err.status(),
        }
    }

    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::SnapshotSaveFailed => "SNAPSHOT_SAVE_FAILED",
            Status::SnapshotRecoverFailed => "SNAPSHOT_RECOVER_FAILED",
            Status::OpenFailed => "OPEN_FAILED",
            Status::SyncFailed => "SYNC_FAILED",
            Status::Cancelled => "CANCELLED",
            Status::Fatal => "FATAL",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical error type shared across the state machine crates.
#[derive(Error, Debug)]
pub enum RsmError {
    #[error("snapshot save: {0}")]
    SnapshotSave(String),
    #[error("snapshot recover: {0}")]
    SnapshotRecover(String),
    #[error("open: {0}")]
    Open(String),
    #[error("sync: {0}")]
    Sync(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("update: {0}")]
    Update(String),
    #[error("lookup: {0}")]
    Lookup(String),
    #[error("state divergence: expected hash {expected:#018x}, got {actual:#018x}")]
    Divergence { expected: u64, actual: u64 },
    #[error("log index gap: expected {expected}, got {actual}")]
    IndexGap { expected: u64, actual: u64 },
    #[error("state machine has not been opened")]
    NotOpened,
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl RsmError {
    /// Map the error onto the host-facing status taxonomy.
    pub fn status(&self) -> Status {
        match self {
            RsmError::SnapshotSave(_) => Status::SnapshotSaveFailed,
            RsmError::SnapshotRecover(_) => Status::SnapshotRecoverFailed,
            RsmError::Open(_) | RsmError::NotOpened => Status::OpenFailed,
            RsmError::Sync(_) => Status::SyncFailed,
            RsmError::Cancelled => Status::Cancelled,
            RsmError::Update(_)
            | RsmError::Lookup(_)
            | RsmError::Divergence { .. }
            | RsmError::IndexGap { .. }
            | RsmError::Io(_) => Status::Fatal,
        }
    }

    /// Whether the hosting replica must stop. Replicated state cannot
    /// tolerate a failed or skipped update, nor a detected hash mismatch.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RsmError::Update(_) | RsmError::Divergence { .. } | RsmError::IndexGap { .. }
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RsmError::Cancelled)
    }
}

/// Result alias that carries an `RsmError`.
pub type RsmResult<T> = Result<T, RsmError>;

/// Storage tuning shared by state machines that own files.
///
/// # Example
/// ```
/// use common::Config;
/// use std::path::PathBuf;
///
/// let config = Config::builder()
///     .data_dir(PathBuf::from("./kv_data"))
///     .snapshot_chunk_size(16 * 1024)
///     .compaction_threshold(1 << 20)
///     .build();
/// assert_eq!(config.snapshots_to_keep, 3);
/// ```
#[derive(Clone, Debug, Serialize, Deserialize, bon::Builder)]
pub struct Config {
    /// Directory owned by the state machine or the snapshotter.
    #[builder(default = PathBuf::from("./rsm_data"))]
    pub data_dir: PathBuf,
    /// Bytes moved per snapshot I/O call; the stop signal is polled once per chunk.
    #[builder(default = 64 * 1024)]
    pub snapshot_chunk_size: usize,
    /// Log size in bytes after which `sync` folds the log into a checkpoint.
    #[builder(default = 4 * 1024 * 1024)]
    pub compaction_threshold: u64,
    /// Number of completed snapshots retained on disk.
    #[builder(default = 3)]
    pub snapshots_to_keep: usize,
    /// Upper bound for a single command, and for any length-prefixed record
    /// read back from disk.
    #[builder(default = 64 * 1024 * 1024)]
    pub max_record_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./rsm_data"),
            snapshot_chunk_size: 64 * 1024,
            compaction_threshold: 4 * 1024 * 1024,
            snapshots_to_keep: 3,
            max_record_size: 64 * 1024 * 1024,
        }
    }
}

/// Convenient re-exports for downstream crates.
pub mod prelude {
    pub use crate::{Config, GroupId, ReplicaId, RsmError, RsmResult, StateMachineKind, Status};
}
