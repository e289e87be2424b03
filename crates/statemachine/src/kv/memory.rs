use super::command::{KvCommand, KvQuery, KvResponse};
use super::state::KvState;
use crate::machine::RegularStateMachine;
use crate::result::{Applied, SnapshotSaved};
use common::{Config, RsmResult};
use snapshot::{SnapshotFile, SnapshotFileCollection, SnapshotSink, SnapshotSource, StopSignal};
use std::io::{Read, Write};

/// In-memory key-value store driven strictly serially.
#[derive(Debug)]
pub struct MemKv {
    state: KvState,
    chunk_size: usize,
    max_record: usize,
}

impl Default for MemKv {
    fn default() -> Self {
        Self::new(&Config::default())
    }
}

impl MemKv {
    pub fn new(config: &Config) -> Self {
        Self {
            state: KvState::new(),
            chunk_size: config.snapshot_chunk_size,
            max_record: config.max_record_size,
        }
    }

    pub fn state(&self) -> &KvState {
        &self.state
    }
}

impl RegularStateMachine for MemKv {
    type Query = KvQuery;
    type Response = KvResponse;

    fn update(&mut self, cmd: &[u8]) -> RsmResult<Applied> {
        let cmd = KvCommand::decode_within(cmd, self.max_record)?;
        Ok(self.state.apply(&cmd))
    }

    fn lookup(&self, query: &KvQuery) -> RsmResult<KvResponse> {
        Ok(self.state.query(query))
    }

    fn hash(&self) -> u64 {
        self.state.hash()
    }

    fn save_snapshot(
        &self,
        writer: &mut dyn Write,
        _files: &mut SnapshotFileCollection,
        stop: &StopSignal,
    ) -> RsmResult<SnapshotSaved> {
        let mut sink = SnapshotSink::new(writer, stop).with_chunk_size(self.chunk_size);
        self.state
            .encode_to(&mut sink)
            .map_err(|e| e.into_save_error())?;
        let written = sink.finish().map_err(|e| e.into_save_error())?;
        Ok(SnapshotSaved::new(written))
    }

    fn recover_from_snapshot(
        &mut self,
        reader: &mut dyn Read,
        _files: &[SnapshotFile],
        stop: &StopSignal,
    ) -> RsmResult<()> {
        let mut source = SnapshotSource::new(reader, stop).with_chunk_size(self.chunk_size);
        let state =
            KvState::decode_from(&mut source, self.max_record).map_err(|e| e.into_recover_error())?;
        source.expect_end().map_err(|e| e.into_recover_error())?;
        self.state = state;
        Ok(())
    }
}
