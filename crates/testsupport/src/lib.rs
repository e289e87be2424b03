//! Test support utilities for the replicated state machine workspace.
//!
//! This crate provides shared testing infrastructure:
//! - Isolated replica contexts backed by temporary directories
//! - Command logs and entry builders for the example machines
//! - Fault-injecting snapshot channels (short writes, truncation, stops)
//! - Property-based generators for KV command logs
//! - Assertion helpers for status codes and hashes
//!
//! # Example Usage
//!
//! ```
//! use statemachine::HelloWorld;
//! use testsupport::prelude::*;
//!
//! let ctx = TestContext::new().unwrap();
//! let replica = ctx.regular(HelloWorld::new()).unwrap();
//! replica.open().unwrap();
//! replica.apply(&entries(1, &counter_commands(3))).unwrap();
//! assert_same_hash(replica.hash(), 3, "after three commands");
//! ```

pub mod assertions;
pub mod channels;
pub mod context;
pub mod fixtures;
pub mod macros;
pub mod proptest_generators;

/// Convenient re-exports for common testing patterns.
pub mod prelude {
    pub use crate::assertions::*;
    pub use crate::channels::*;
    pub use crate::context::*;
    pub use crate::fixtures::*;
}
