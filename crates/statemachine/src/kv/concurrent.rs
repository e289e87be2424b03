use super::command::{KvCommand, KvQuery, KvResponse};
use super::state::KvState;
use crate::machine::ConcurrentStateMachine;
use crate::result::{Applied, SnapshotSaved};
use common::{Config, RsmResult};
use parking_lot::RwLock;
use snapshot::{SnapshotFile, SnapshotFileCollection, SnapshotSink, SnapshotSource, StopSignal};
use std::io::{Read, Write};
use std::sync::Arc;
use tracing::debug;

/// Point-in-time view of a [`ConcurrentKv`], shared with the live state
/// until the next update copies it.
#[derive(Clone, Debug)]
pub struct KvView(Arc<KvState>);

impl KvView {
    pub fn state(&self) -> &KvState {
        &self.0
    }
}

/// Key-value store that answers lookups while an update is applied.
///
/// Readers clone the current `Arc` under a short read lock and work on that
/// version without holding the lock. An update copies the map only while a
/// reader or a prepared snapshot still holds the current version.
#[derive(Debug)]
pub struct ConcurrentKv {
    state: RwLock<Arc<KvState>>,
    chunk_size: usize,
    max_record: usize,
}

impl Default for ConcurrentKv {
    fn default() -> Self {
        Self::new(&Config::default())
    }
}

impl ConcurrentKv {
    pub fn new(config: &Config) -> Self {
        Self {
            state: RwLock::new(Arc::new(KvState::new())),
            chunk_size: config.snapshot_chunk_size,
            max_record: config.max_record_size,
        }
    }

    fn current(&self) -> Arc<KvState> {
        Arc::clone(&self.state.read())
    }
}

impl ConcurrentStateMachine for ConcurrentKv {
    type Query = KvQuery;
    type Response = KvResponse;
    type Context = KvView;

    fn update(&self, cmd: &[u8]) -> RsmResult<Applied> {
        let cmd = KvCommand::decode_within(cmd, self.max_record)?;
        let mut state = self.state.write();
        Ok(Arc::make_mut(&mut state).apply(&cmd))
    }

    fn lookup(&self, query: &KvQuery) -> RsmResult<KvResponse> {
        Ok(self.current().query(query))
    }

    fn hash(&self) -> u64 {
        self.current().hash()
    }

    fn prepare_snapshot(&self) -> RsmResult<KvView> {
        Ok(KvView(self.current()))
    }

    fn save_snapshot(
        &self,
        ctx: KvView,
        writer: &mut dyn Write,
        _files: &mut SnapshotFileCollection,
        stop: &StopSignal,
    ) -> RsmResult<SnapshotSaved> {
        let mut sink = SnapshotSink::new(writer, stop).with_chunk_size(self.chunk_size);
        ctx.state()
            .encode_to(&mut sink)
            .map_err(|e| e.into_save_error())?;
        let written = sink.finish().map_err(|e| e.into_save_error())?;
        debug!(entries = ctx.state().len(), written, "Saved concurrent kv view");
        Ok(SnapshotSaved::new(written))
    }

    fn recover_from_snapshot(
        &self,
        reader: &mut dyn Read,
        _files: &[SnapshotFile],
        stop: &StopSignal,
    ) -> RsmResult<()> {
        let mut source = SnapshotSource::new(reader, stop).with_chunk_size(self.chunk_size);
        let state =
            KvState::decode_from(&mut source, self.max_record).map_err(|e| e.into_recover_error())?;
        source.expect_end().map_err(|e| e.into_recover_error())?;
        *self.state.write() = Arc::new(state);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Status;

    fn put(key: &str, value: &str) -> Vec<u8> {
        KvCommand::put(key, value).encode().unwrap()
    }

    #[test]
    fn prepared_view_is_not_affected_by_later_updates() {
        let kv = ConcurrentKv::default();
        kv.update(&put("a", "1")).unwrap();
        let view = kv.prepare_snapshot().unwrap();

        kv.update(&put("a", "2")).unwrap();
        kv.update(&put("b", "3")).unwrap();

        assert_eq!(view.state().get(b"a"), Some(&b"1"[..]));
        assert_eq!(view.state().len(), 1);
        assert_eq!(kv.current().len(), 2);
    }

    #[test]
    fn save_releases_the_view() {
        let kv = ConcurrentKv::default();
        kv.update(&put("a", "1")).unwrap();
        let stop = StopSignal::new();

        let view = kv.prepare_snapshot().unwrap();
        assert_eq!(Arc::strong_count(&kv.current()), 3);
        kv.save_snapshot(view, &mut Vec::<u8>::new(), &mut SnapshotFileCollection::new(), &stop)
            .unwrap();
        assert_eq!(Arc::strong_count(&kv.current()), 2);
    }

    #[test]
    fn cancelled_save_releases_the_view() {
        let kv = ConcurrentKv::default();
        kv.update(&put("a", "1")).unwrap();
        let stop = StopSignal::new();
        stop.stop();

        let view = kv.prepare_snapshot().unwrap();
        let result =
            kv.save_snapshot(view, &mut Vec::<u8>::new(), &mut SnapshotFileCollection::new(), &stop);
        assert_eq!(Status::of(&result), Status::Cancelled);
        // Only the live state and the probe below remain.
        assert_eq!(Arc::strong_count(&kv.current()), 2);
    }

    #[test]
    fn snapshot_round_trip() {
        let kv = ConcurrentKv::default();
        for i in 0..50 {
            kv.update(&put(&format!("k{i:02}"), &i.to_string())).unwrap();
        }
        let stop = StopSignal::new();
        let mut buf: Vec<u8> = Vec::new();
        let view = kv.prepare_snapshot().unwrap();
        kv.save_snapshot(view, &mut buf, &mut SnapshotFileCollection::new(), &stop)
            .unwrap();

        let restored = ConcurrentKv::default();
        restored
            .recover_from_snapshot(&mut &buf[..], &[], &stop)
            .unwrap();
        assert_eq!(restored.hash(), kv.hash());
        assert_eq!(restored.lookup(&KvQuery::Len).unwrap(), KvResponse::Len(50));
    }

    #[test]
    fn oversized_command_leaves_state_untouched() {
        let kv = ConcurrentKv::new(&Config::builder().max_record_size(64).build());
        kv.update(&put("a", "1")).unwrap();

        let err = kv.update(&put("big", &"v".repeat(200))).unwrap_err();
        assert_eq!(err.status(), Status::Fatal);
        assert_eq!(kv.lookup(&KvQuery::Len).unwrap(), KvResponse::Len(1));
    }
}
