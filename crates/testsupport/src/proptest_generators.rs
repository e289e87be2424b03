//! Property-based test generators using proptest.
//!
//! Keys come from a small alphabet so generated logs overwrite and delete
//! keys that actually exist, which is where determinism bugs hide.

use crate::fixtures::encode;
use proptest::prelude::*;
use statemachine::KvCommand;

/// Strategy for keys drawn from a deliberately small space.
pub fn arb_key() -> impl Strategy<Value = Vec<u8>> {
    "[a-d]{1,2}".prop_map(String::into_bytes)
}

/// Strategy for values, including empty ones.
pub fn arb_value() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..24)
}

fn arb_single_command() -> impl Strategy<Value = KvCommand> {
    prop_oneof![
        3 => (arb_key(), arb_value()).prop_map(|(key, value)| KvCommand::Put { key, value }),
        1 => arb_key().prop_map(|key| KvCommand::Delete { key }),
    ]
}

/// Strategy for a KV command, occasionally a batch of simple commands.
///
/// # Example
///
/// ```
/// use proptest::prelude::*;
/// use testsupport::proptest_generators::arb_kv_command;
///
/// proptest! {
///     #[test]
///     fn commands_encode(cmd in arb_kv_command()) {
///         prop_assert!(cmd.encode().is_ok());
///     }
/// }
/// ```
pub fn arb_kv_command() -> impl Strategy<Value = KvCommand> {
    prop_oneof![
        4 => arb_single_command(),
        1 => prop::collection::vec(arb_single_command(), 0..5).prop_map(KvCommand::Batch),
    ]
}

/// Strategy for an encoded command log of up to `max_len` commands.
pub fn arb_command_log(max_len: usize) -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(arb_kv_command().prop_map(|cmd| encode(&cmd)), 0..max_len)
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn generated_commands_decode_back(cmd in arb_kv_command()) {
            let bytes = cmd.encode().unwrap();
            prop_assert_eq!(KvCommand::decode(&bytes).unwrap(), cmd);
        }

        #[test]
        fn logs_respect_length_bound(log in arb_command_log(8)) {
            prop_assert!(log.len() < 8);
        }
    }
}
