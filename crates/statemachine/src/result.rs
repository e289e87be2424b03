//! Typed values returned by state machine operations.

use serde::{Deserialize, Serialize};

/// Result of applying one command.
///
/// `value` is an application-defined number (a counter, the number of keys
/// touched, ...) and `data` an optional payload handed back to the proposer.
/// Both must be a deterministic function of the command and the applied state.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Applied {
    pub value: u64,
    pub data: Vec<u8>,
}

impl Applied {
    pub fn value(value: u64) -> Self {
        Self {
            value,
            data: Vec::new(),
        }
    }

    pub fn with_data(value: u64, data: impl Into<Vec<u8>>) -> Self {
        Self {
            value,
            data: data.into(),
        }
    }
}

/// Successful snapshot save.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotSaved {
    /// Payload bytes written to the snapshot channel
    pub bytes_written: u64,
}

impl SnapshotSaved {
    pub fn new(bytes_written: u64) -> Self {
        Self { bytes_written }
    }
}
