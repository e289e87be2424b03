//! Cooperative cancellation for long-running snapshot work.

use crate::error::SnapshotError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One-shot stop flag shared between the host and a running snapshot save,
/// restore or open. Clones observe the same flag. Checking never blocks.
#[derive(Clone, Debug, Default)]
pub struct StopSignal {
    stopped: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that work observing this signal stop at its next poll.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Returns `SnapshotError::Cancelled` once the signal has fired.
    pub fn check(&self) -> Result<(), SnapshotError> {
        if self.is_stopped() {
            Err(SnapshotError::Cancelled)
        } else {
            Ok(())
        }
    }
}
