//! Custom assertion helpers for testing.
//!
//! Provides assertions over the host-facing status taxonomy and replica
//! hashes, with failure messages that name the expected code.

use common::{RsmResult, Status};
use std::fmt::Debug;

/// Assert that `result` maps to `expected`.
///
/// # Example
///
/// ```
/// use common::{RsmError, RsmResult, Status};
/// use testsupport::prelude::*;
///
/// let result: RsmResult<()> = Err(RsmError::Sync("disk full".into()));
/// assert_status(&result, Status::SyncFailed);
/// ```
pub fn assert_status<T: Debug>(result: &RsmResult<T>, expected: Status) {
    let actual = Status::of(result);
    assert_eq!(
        actual, expected,
        "Expected status {expected}, got {actual} from {result:?}"
    );
}

/// Assert that an operation was cancelled rather than failing.
pub fn assert_cancelled<T: Debug>(result: &RsmResult<T>) {
    assert_status(result, Status::Cancelled);
}

/// Assert that an operation failed in a way the replica cannot survive.
pub fn assert_fatal<T: Debug>(result: &RsmResult<T>) {
    match result {
        Ok(value) => panic!("Expected fatal error, got Ok({value:?})"),
        Err(e) => assert!(e.is_fatal(), "Expected fatal error, got: {e}"),
    }
}

/// Assert that an error message contains `expected_msg`.
pub fn assert_error_contains<T: Debug>(result: &RsmResult<T>, expected_msg: &str) {
    match result {
        Ok(value) => panic!("Expected error containing '{expected_msg}', but got Ok({value:?})"),
        Err(e) => {
            let error_string = e.to_string();
            assert!(
                error_string.contains(expected_msg),
                "Expected error to contain '{expected_msg}', but got: {error_string}"
            );
        }
    }
}

/// Assert that two state hashes agree, printing both in hex on failure.
pub fn assert_same_hash(actual: u64, expected: u64, context: &str) {
    assert!(
        actual == expected,
        "Hash mismatch {context}: expected {expected:#018x}, got {actual:#018x}"
    );
}
