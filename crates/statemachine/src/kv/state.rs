//! Ordered key-value state shared by the three KV machines.
//!
//! The canonical encoding is `count: u64` followed by `count` pairs of
//! length-prefixed key and value, in ascending key order. It is what the
//! snapshots carry and what `hash` checksums, so equal maps always produce
//! equal bytes.

use super::command::{KvCommand, KvQuery, KvResponse};
use crate::result::Applied;
use snapshot::{SnapshotError, SnapshotResult, SnapshotSink, SnapshotSource};
use std::collections::BTreeMap;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KvState {
    map: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl KvState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.map.get(key).map(Vec::as_slice)
    }

    /// Apply a decoded command.
    ///
    /// `value` counts the keys the command changed. For a single put or
    /// delete, `data` holds the previous value of the key, if any.
    pub fn apply(&mut self, cmd: &KvCommand) -> Applied {
        match cmd {
            KvCommand::Put { key, value } => {
                match self.map.insert(key.clone(), value.clone()) {
                    Some(prev) => Applied::with_data(1, prev),
                    None => Applied::value(1),
                }
            }
            KvCommand::Delete { key } => match self.map.remove(key) {
                Some(prev) => Applied::with_data(1, prev),
                None => Applied::value(0),
            },
            KvCommand::Batch(cmds) => {
                let changed = cmds.iter().map(|c| self.apply(c).value).sum();
                Applied::value(changed)
            }
        }
    }

    pub fn query(&self, query: &KvQuery) -> KvResponse {
        match query {
            KvQuery::Get(key) => KvResponse::Value(self.map.get(key).cloned()),
            KvQuery::Len => KvResponse::Len(self.map.len() as u64),
            KvQuery::Scan { prefix } => KvResponse::Entries(
                self.map
                    .range(prefix.clone()..)
                    .take_while(|(k, _)| k.starts_with(prefix))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            ),
        }
    }

    /// Entry count in the high 32 bits, CRC32 of the canonical encoding in
    /// the low 32 bits.
    pub fn hash(&self) -> u64 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&(self.map.len() as u64).to_le_bytes());
        for (key, value) in &self.map {
            hasher.update(&(key.len() as u64).to_le_bytes());
            hasher.update(key);
            hasher.update(&(value.len() as u64).to_le_bytes());
            hasher.update(value);
        }
        ((self.map.len() as u64) << 32) | u64::from(hasher.finalize())
    }

    /// Stream the canonical encoding into `sink`.
    pub fn encode_to(&self, sink: &mut SnapshotSink<'_>) -> SnapshotResult<()> {
        sink.write_u64(self.map.len() as u64)?;
        for (key, value) in &self.map {
            sink.write_bytes(key)?;
            sink.write_bytes(value)?;
        }
        Ok(())
    }

    /// Decode a canonical encoding into a new state. Keys must be strictly
    /// ascending and no record may exceed `max_record` bytes.
    pub fn decode_from(source: &mut SnapshotSource<'_>, max_record: usize) -> SnapshotResult<Self> {
        let count = source.read_u64()?;
        let mut map = BTreeMap::new();
        let mut last: Option<Vec<u8>> = None;
        for _ in 0..count {
            let key = source.read_bytes(max_record)?;
            let value = source.read_bytes(max_record)?;
            if last.as_ref().is_some_and(|prev| *prev >= key) {
                return Err(SnapshotError::Corrupt("keys out of order".into()));
            }
            last = Some(key.clone());
            map.insert(key, value);
        }
        Ok(Self { map })
    }
}
