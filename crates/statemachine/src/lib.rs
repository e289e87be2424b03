//! Pluggable replicated state machines.
//!
//! A consensus host delivers committed commands to a state machine in log
//! order. Every replica applying the same commands must reach the same state,
//! observable through [`RegularStateMachine::hash`] and its siblings. This
//! crate defines the three contracts a machine can implement, example
//! machines for each, and a small host ([`Replica`]) that drives them.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                     Replica                          │
//! │  apply(entries)  lookup(q)  save_snapshot()  open()  │
//! └────────┬───────────────┬──────────────────┬──────────┘
//!          │ update gate   │                  │
//!          ▼               ▼                  ▼
//! ┌──────────────────────────────────┐  ┌──────────────┐
//! │ Regular │ Concurrent │ On-disk   │  │ Snapshotter  │
//! │ machine │ machine    │ machine   │──▶ snapshot-N/  │
//! └──────────────────────────────────┘  └──────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use statemachine::{HelloWorld, RegularStateMachine};
//!
//! let mut sm = HelloWorld::new();
//! assert_eq!(sm.update(b"A").unwrap().value, 1);
//! assert_eq!(sm.update(b"B").unwrap().value, 2);
//! assert_eq!(sm.hash(), 2);
//! ```

pub mod config;
pub mod counter;
pub mod kv;
pub mod machine;
pub mod replica;
pub mod result;
pub mod snapshotter;

pub use config::ReplicaConfig;
pub use counter::{ConcurrentCounter, HelloWorld};
pub use kv::{ConcurrentKv, DiskKv, KvCommand, KvQuery, KvResponse, KvState, MemKv};
pub use machine::{ConcurrentStateMachine, OnDiskStateMachine, RegularStateMachine};
pub use replica::{Entry, Replica};
pub use result::{Applied, SnapshotSaved};
pub use snapshotter::{ManifestFile, SnapshotMeta, Snapshotter};
