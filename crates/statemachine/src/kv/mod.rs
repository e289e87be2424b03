//! Key-value state machines, one per variant.
//!
//! All three share [`KvState`] and the [`KvCommand`] encoding, so the same
//! command log drives any of them to the same hash.

pub mod command;
pub mod concurrent;
pub mod disk;
pub mod memory;
pub mod state;

pub use command::{KvCommand, KvQuery, KvResponse};
pub use concurrent::{ConcurrentKv, KvView};
pub use disk::{DiskKv, DiskView};
pub use memory::MemKv;
pub use state::KvState;
