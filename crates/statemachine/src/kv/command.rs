//! Commands and queries understood by the key-value machines.

use common::{RsmError, RsmResult};
use serde::{Deserialize, Serialize};

/// A replicated mutation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum KvCommand {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
    /// Applied as a unit: lookups never observe half a batch.
    Batch(Vec<KvCommand>),
}

impl KvCommand {
    pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        KvCommand::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn delete(key: impl Into<Vec<u8>>) -> Self {
        KvCommand::Delete { key: key.into() }
    }

    /// Encode into the bytes a proposer hands to the log.
    pub fn encode(&self) -> RsmResult<Vec<u8>> {
        bincode::serde::encode_to_vec(self, bincode::config::legacy())
            .map_err(|e| RsmError::Update(format!("encode command: {e}")))
    }

    /// Decode a committed command. Malformed bytes are fatal: every replica
    /// would reject them identically, so there is nothing to retry.
    pub fn decode(bytes: &[u8]) -> RsmResult<Self> {
        let (cmd, read) =
            bincode::serde::decode_from_slice::<KvCommand, _>(bytes, bincode::config::legacy())
                .map_err(|e| RsmError::Update(format!("decode command: {e}")))?;
        if read != bytes.len() {
            return Err(RsmError::Update(format!(
                "{} trailing bytes after command",
                bytes.len() - read
            )));
        }
        Ok(cmd)
    }

    /// Decode a command bound for storage. Anything larger than
    /// `max_record` bytes (or a `u32` record length) could be written but
    /// never read back, so it is rejected before it is applied.
    pub fn decode_within(bytes: &[u8], max_record: usize) -> RsmResult<Self> {
        if bytes.len() > max_record || u32::try_from(bytes.len()).is_err() {
            return Err(RsmError::Update(format!(
                "command of {} bytes exceeds limit of {max_record}",
                bytes.len()
            )));
        }
        Self::decode(bytes)
    }
}

/// A read-only question.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum KvQuery {
    Get(Vec<u8>),
    Len,
    /// All entries whose key starts with `prefix`, in key order.
    Scan { prefix: Vec<u8> },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum KvResponse {
    Value(Option<Vec<u8>>),
    Len(u64),
    Entries(Vec<(Vec<u8>, Vec<u8>)>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_survives_encoding() {
        let cmd = KvCommand::Batch(vec![KvCommand::put("a", "1"), KvCommand::delete("b")]);
        let bytes = cmd.encode().unwrap();
        assert_eq!(KvCommand::decode(&bytes).unwrap(), cmd);
    }

    #[test]
    fn oversized_command_is_rejected_before_decoding() {
        let bytes = KvCommand::put("k", vec![b'v'; 100]).encode().unwrap();
        let err = KvCommand::decode_within(&bytes, 64).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("exceeds limit of 64"));
        assert!(KvCommand::decode_within(&bytes, bytes.len()).is_ok());
    }

    #[test]
    fn garbage_is_an_update_error() {
        let err = KvCommand::decode(&[0xff, 0xff, 0xff, 0xff]).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut bytes = KvCommand::delete("k").encode().unwrap();
        bytes.push(0);
        assert!(matches!(KvCommand::decode(&bytes), Err(RsmError::Update(_))));
    }
}
