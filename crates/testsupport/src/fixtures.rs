//! Common command logs and entry builders.

use statemachine::{Entry, KvCommand};

/// `n` opaque commands for the counter machines ("cmd-1", "cmd-2", ...).
///
/// # Example
///
/// ```
/// use testsupport::prelude::*;
///
/// assert_eq!(counter_commands(2), vec![b"cmd-1".to_vec(), b"cmd-2".to_vec()]);
/// ```
pub fn counter_commands(n: usize) -> Vec<Vec<u8>> {
    (1..=n).map(|i| format!("cmd-{i}").into_bytes()).collect()
}

/// Number `commands` as consecutive log entries starting at `first_index`.
///
/// # Example
///
/// ```
/// use testsupport::prelude::*;
///
/// let log = entries(5, &counter_commands(2));
/// assert_eq!(log[0].index, 5);
/// assert_eq!(log[1].index, 6);
/// ```
pub fn entries(first_index: u64, commands: &[Vec<u8>]) -> Vec<Entry> {
    commands
        .iter()
        .zip(first_index..)
        .map(|(cmd, index)| Entry::new(index, cmd.clone()))
        .collect()
}

/// Encoded `Put`.
pub fn put_cmd(key: &str, value: &str) -> Vec<u8> {
    encode(&KvCommand::put(key, value))
}

/// Encoded `Delete`.
pub fn delete_cmd(key: &str) -> Vec<u8> {
    encode(&KvCommand::delete(key))
}

/// Encoded `Batch` of puts, applied atomically by every KV machine.
pub fn batch_put_cmd(pairs: &[(&str, &str)]) -> Vec<u8> {
    encode(&KvCommand::Batch(
        pairs.iter().map(|(k, v)| KvCommand::put(*k, *v)).collect(),
    ))
}

/// A small KV workload mixing overwrites, deletes and batches.
pub fn sample_kv_log() -> Vec<Vec<u8>> {
    vec![
        put_cmd("alpha", "1"),
        put_cmd("beta", "2"),
        put_cmd("gamma", "3"),
        put_cmd("alpha", "10"),
        delete_cmd("beta"),
        batch_put_cmd(&[("delta", "4"), ("epsilon", "5")]),
        delete_cmd("missing"),
        put_cmd("beta", "20"),
    ]
}

/// `n` puts of distinct keys with values large enough to span several
/// snapshot chunks when the chunk size is small.
pub fn bulk_kv_log(n: usize) -> Vec<Vec<u8>> {
    (0..n)
        .map(|i| put_cmd(&format!("key-{i:05}"), &"v".repeat(32 + i % 7)))
        .collect()
}

pub(crate) fn encode(cmd: &KvCommand) -> Vec<u8> {
    cmd.encode().expect("KV commands always encode")
}
