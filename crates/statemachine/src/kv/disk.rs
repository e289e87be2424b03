//! Durable key-value store that owns its files.
//!
//! ## File Layout
//!
//! ```text
//! {data_dir}/
//! ├── kv.checkpoint            # Full state at some applied index
//! └── kv-{generation}.log      # Records applied after that checkpoint
//! ```
//!
//! The checkpoint names the generation of the log that continues it.
//! Replacing the checkpoint (compaction or snapshot recovery) first stages
//! the new checkpoint under a temp name and creates an empty log for the
//! next generation, then renames the checkpoint into place. The rename is
//! the commit point: before it `open` sees the old checkpoint and its log,
//! after it the new checkpoint and the empty log. Logs of any other
//! generation are removed at the next `open`.
//!
//! ## Log Record Format
//!
//! ```text
//! ┌────────────────────────────────────┐
//! │ Header (28 bytes)                  │
//! │ ├─ magic: u32 (0x4B564C47 "KVLG") │
//! │ ├─ checksum: u32 (CRC32)          │
//! │ ├─ length: u32                     │
//! │ ├─ index: u64                      │
//! │ └─ prev_index: u64                 │
//! ├────────────────────────────────────┤
//! │ Payload (encoded KvCommand)        │
//! └────────────────────────────────────┘
//! ```
//!
//! `prev_index` chains each record to the one before it (or to the
//! checkpoint). Replay stops at the first record that is torn, fails its
//! checksum or breaks the chain; everything after it is truncated.
//!
//! ## Checkpoint Format
//!
//! `magic: u32 (0x4B564350 "KVCP") | checksum: u32 | length: u64 | body`,
//! where the body is the log generation, then the applied index and the
//! canonical state encoding (the same bytes a snapshot of this machine
//! carries).

use super::command::{KvCommand, KvQuery, KvResponse};
use super::state::KvState;
use crate::machine::OnDiskStateMachine;
use crate::result::{Applied, SnapshotSaved};
use common::{Config, RsmError, RsmResult};
use parking_lot::{Mutex, RwLock};
use snapshot::{SnapshotResult, SnapshotSink, SnapshotSource, StopSignal};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

const CHECKPOINT_FILE: &str = "kv.checkpoint";
const CHECKPOINT_TEMP_FILE: &str = "kv.checkpoint.tmp";
const LOG_PREFIX: &str = "kv-";
const LOG_SUFFIX: &str = ".log";

/// Magic bytes for log records: "KVLG" in ASCII
const LOG_MAGIC: u32 = 0x4B564C47;

/// Magic bytes for the checkpoint: "KVCP" in ASCII
const CHECKPOINT_MAGIC: u32 = 0x4B564350;

const RECORD_HEADER_SIZE: usize = 28;
const CHECKPOINT_HEADER_SIZE: usize = 16;

fn log_file_name(generation: u64) -> String {
    format!("{LOG_PREFIX}{generation:010}{LOG_SUFFIX}")
}

fn parse_log_generation(name: &str) -> Option<u64> {
    name.strip_prefix(LOG_PREFIX)?
        .strip_suffix(LOG_SUFFIX)?
        .parse()
        .ok()
}

/// Header for each record in the log.
#[derive(Clone, Debug)]
struct RecordHeader {
    magic: u32,
    /// CRC32 of the payload
    checksum: u32,
    length: u32,
    index: u64,
    prev_index: u64,
}

impl RecordHeader {
    fn for_payload(payload: &[u8], index: u64, prev_index: u64) -> RsmResult<Self> {
        let length = u32::try_from(payload.len()).map_err(|_| {
            RsmError::Update(format!("record of {} bytes does not fit the log", payload.len()))
        })?;
        Ok(Self {
            magic: LOG_MAGIC,
            checksum: crc32fast::hash(payload),
            length,
            index,
            prev_index,
        })
    }

    fn to_bytes(&self) -> [u8; RECORD_HEADER_SIZE] {
        let mut buf = [0u8; RECORD_HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4..8].copy_from_slice(&self.checksum.to_le_bytes());
        buf[8..12].copy_from_slice(&self.length.to_le_bytes());
        buf[12..20].copy_from_slice(&self.index.to_le_bytes());
        buf[20..28].copy_from_slice(&self.prev_index.to_le_bytes());
        buf
    }

    fn from_bytes(buf: &[u8; RECORD_HEADER_SIZE]) -> Self {
        Self {
            magic: u32_at(buf, 0),
            checksum: u32_at(buf, 4),
            length: u32_at(buf, 8),
            index: u64_at(buf, 12),
            prev_index: u64_at(buf, 20),
        }
    }
}

fn u32_at(buf: &[u8], at: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(bytes)
}

fn u64_at(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(bytes)
}

/// Append handle on the log of one generation.
#[derive(Debug)]
struct RecordLog {
    file: File,
    path: PathBuf,
    generation: u64,
    len: u64,
}

impl RecordLog {
    /// Open the log for appending, cutting it to `valid_len` bytes.
    fn open(dir: &Path, generation: u64, valid_len: u64) -> io::Result<Self> {
        let path = dir.join(log_file_name(generation));
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;
        if file.metadata()?.len() != valid_len {
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        file.seek(SeekFrom::Start(valid_len))?;
        Ok(Self {
            file,
            path,
            generation,
            len: valid_len,
        })
    }

    /// Create an empty, durable log for a checkpoint about to be written.
    fn create(dir: &Path, generation: u64) -> io::Result<Self> {
        let path = dir.join(log_file_name(generation));
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        file.sync_all()?;
        Ok(Self {
            file,
            path,
            generation,
            len: 0,
        })
    }

    fn append(&mut self, header: &RecordHeader, payload: &[u8]) -> io::Result<()> {
        let mut buf = Vec::with_capacity(RECORD_HEADER_SIZE + payload.len());
        buf.extend_from_slice(&header.to_bytes());
        buf.extend_from_slice(payload);
        self.file.write_all(&buf)?;
        self.len += buf.len() as u64;
        Ok(())
    }

    fn sync(&self) -> io::Result<()> {
        self.file.sync_data()
    }

    /// Close and delete a log the current checkpoint no longer refers to.
    fn retire(self) {
        let path = self.path.clone();
        drop(self);
        discard(&path);
    }
}

/// Contents of `kv.checkpoint`.
#[derive(Debug, Default)]
struct Checkpoint {
    generation: u64,
    index: u64,
    state: KvState,
}

/// Outcome of scanning the log at open.
struct Replay {
    state: KvState,
    applied: u64,
    records: u64,
    valid_len: u64,
    file_len: u64,
}

/// Point-in-time view of a [`DiskKv`] with the index it reflects.
#[derive(Clone, Debug)]
pub struct DiskView {
    index: u64,
    state: Arc<KvState>,
}

impl DiskView {
    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn state(&self) -> &KvState {
        &self.state
    }
}

/// Key-value store persisted as a checkpoint plus an append-only log.
///
/// Updates append to the log without an fsync; `sync` makes them durable and
/// folds the log into a new checkpoint once it outgrows
/// `Config::compaction_threshold`. Commands larger than
/// `Config::max_record_size` are rejected before they reach the log.
#[derive(Debug)]
pub struct DiskKv {
    dir: PathBuf,
    config: Config,
    state: RwLock<Arc<KvState>>,
    applied: AtomicU64,
    /// Held across append + apply so a prepared view sees both or neither.
    log: Mutex<Option<RecordLog>>,
    opened: AtomicBool,
}

impl DiskKv {
    /// Create a store rooted at `config.data_dir`. Nothing is read until
    /// `open`.
    pub fn new(config: &Config) -> Self {
        Self {
            dir: config.data_dir.clone(),
            config: config.clone(),
            state: RwLock::new(Arc::new(KvState::new())),
            applied: AtomicU64::new(0),
            log: Mutex::new(None),
            opened: AtomicBool::new(false),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn applied_index(&self) -> u64 {
        self.applied.load(Ordering::Acquire)
    }

    pub fn is_open(&self) -> bool {
        self.opened.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> RsmResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(RsmError::NotOpened)
        }
    }

    fn current(&self) -> Arc<KvState> {
        Arc::clone(&self.state.read())
    }

    fn replay(
        &self,
        generation: u64,
        mut state: KvState,
        mut applied: u64,
        stop: &StopSignal,
    ) -> RsmResult<Replay> {
        let path = self.dir.join(log_file_name(generation));
        let empty = |state, applied| Replay {
            state,
            applied,
            records: 0,
            valid_len: 0,
            file_len: 0,
        };
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(empty(state, applied)),
            Err(e) => return Err(RsmError::Open(format!("open {}: {e}", path.display()))),
        };
        let file_len = file
            .metadata()
            .map_err(|e| RsmError::Open(format!("stat {}: {e}", path.display())))?
            .len();
        let mut reader = BufReader::new(file);
        let mut offset = 0u64;
        let mut records = 0u64;

        loop {
            stop.check().map_err(|e| e.into_recover_error())?;

            let mut header_buf = [0u8; RECORD_HEADER_SIZE];
            if reader.read_exact(&mut header_buf).is_err() {
                break;
            }
            let header = RecordHeader::from_bytes(&header_buf);
            if header.magic != LOG_MAGIC || header.length as usize > self.config.max_record_size {
                break;
            }

            let mut payload = vec![0u8; header.length as usize];
            if reader.read_exact(&mut payload).is_err() {
                break;
            }
            if crc32fast::hash(&payload) != header.checksum {
                break;
            }
            if header.prev_index != applied || header.index <= applied {
                break;
            }

            let cmd = KvCommand::decode(&payload)
                .map_err(|e| RsmError::Open(format!("record {} unreadable: {e}", header.index)))?;
            state.apply(&cmd);
            applied = header.index;
            records += 1;
            offset += RECORD_HEADER_SIZE as u64 + u64::from(header.length);
        }

        Ok(Replay {
            state,
            applied,
            records,
            valid_len: offset,
            file_len,
        })
    }

    /// Make `state` at `index` the checkpoint for `generation` and return
    /// the empty log that continues it. On error the previous checkpoint
    /// and its log are still what `open` reads.
    fn replace_checkpoint(
        &self,
        generation: u64,
        index: u64,
        state: &KvState,
    ) -> io::Result<RecordLog> {
        let temp = self.dir.join(CHECKPOINT_TEMP_FILE);
        if let Err(e) = write_checkpoint(&temp, generation, index, state) {
            discard(&temp);
            return Err(e);
        }
        let log = match RecordLog::create(&self.dir, generation) {
            Ok(log) => log,
            Err(e) => {
                discard(&temp);
                return Err(e);
            }
        };
        if let Err(e) = fs::rename(&temp, self.dir.join(CHECKPOINT_FILE)) {
            discard(&temp);
            log.retire();
            return Err(e);
        }
        if let Err(e) = File::open(&self.dir).and_then(|d| d.sync_all()) {
            warn!(dir = %self.dir.display(), error = %e, "Failed to fsync kv directory");
        }

        info!(dir = %self.dir.display(), generation, index, entries = state.len(), "Wrote kv checkpoint");
        Ok(log)
    }

    /// Highest generation named by the checkpoint or any log file. Used
    /// when a snapshot arrives before `open` has read the directory.
    fn highest_generation(&self) -> u64 {
        let from_logs = fs::read_dir(&self.dir)
            .into_iter()
            .flatten()
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().to_str().and_then(parse_log_generation))
            .max()
            .unwrap_or(0);
        checkpoint_generation(&self.dir).unwrap_or(0).max(from_logs)
    }

    /// Remove the checkpoint temp file and logs of other generations.
    fn remove_stale_files(&self, generation: u64) -> io::Result<()> {
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let stale = name == CHECKPOINT_TEMP_FILE
                || parse_log_generation(name).is_some_and(|g| g != generation);
            if stale {
                debug!(file = name, "Removing stale kv file");
                discard(&entry.path());
            }
        }
        Ok(())
    }
}

impl OnDiskStateMachine for DiskKv {
    type Query = KvQuery;
    type Response = KvResponse;
    type Context = DiskView;

    fn open(&self, stop: &StopSignal) -> RsmResult<u64> {
        stop.check().map_err(|e| e.into_recover_error())?;
        let mut log = self.log.lock();
        if self.is_open() {
            return Err(RsmError::Open("already opened".into()));
        }

        let checkpoint =
            read_checkpoint(&self.dir, self.config.max_record_size)?.unwrap_or_default();
        let (generation, checkpoint_index) = (checkpoint.generation, checkpoint.index);
        let replay = self.replay(generation, checkpoint.state, checkpoint_index, stop)?;

        // Last chance to back out: nothing on disk or in memory has changed.
        stop.check().map_err(|e| e.into_recover_error())?;

        fs::create_dir_all(&self.dir)
            .map_err(|e| RsmError::Open(format!("create {}: {e}", self.dir.display())))?;
        self.remove_stale_files(generation)
            .map_err(|e| RsmError::Open(format!("list {}: {e}", self.dir.display())))?;
        if replay.valid_len < replay.file_len {
            warn!(
                generation,
                valid_len = replay.valid_len,
                file_len = replay.file_len,
                "Truncating torn kv log tail"
            );
        }
        let record_log = RecordLog::open(&self.dir, generation, replay.valid_len)
            .map_err(|e| RsmError::Open(format!("open log: {e}")))?;

        *self.state.write() = Arc::new(replay.state);
        self.applied.store(replay.applied, Ordering::Release);
        *log = Some(record_log);
        self.opened.store(true, Ordering::Release);

        info!(
            dir = %self.dir.display(),
            generation,
            checkpoint_index,
            replayed = replay.records,
            applied = replay.applied,
            "Opened disk kv"
        );
        Ok(replay.applied)
    }

    fn update(&self, cmd: &[u8], index: u64) -> RsmResult<Applied> {
        self.ensure_open()?;
        let mut log = self.log.lock();
        let applied = self.applied_index();
        if index <= applied {
            return Err(RsmError::IndexGap {
                expected: applied + 1,
                actual: index,
            });
        }

        let decoded = KvCommand::decode_within(cmd, self.config.max_record_size)?;
        let header = RecordHeader::for_payload(cmd, index, applied)?;
        let log = log.as_mut().ok_or(RsmError::NotOpened)?;
        log.append(&header, cmd)
            .map_err(|e| RsmError::Update(format!("append record {index}: {e}")))?;

        let result = Arc::make_mut(&mut self.state.write()).apply(&decoded);
        self.applied.store(index, Ordering::Release);
        Ok(result)
    }

    fn lookup(&self, query: &KvQuery) -> RsmResult<KvResponse> {
        self.ensure_open()?;
        Ok(self.current().query(query))
    }

    fn sync(&self) -> RsmResult<()> {
        self.ensure_open()?;
        let mut guard = self.log.lock();
        let log = guard.as_mut().ok_or(RsmError::NotOpened)?;
        log.sync()
            .map_err(|e| RsmError::Sync(format!("fsync log: {e}")))?;

        if log.len > self.config.compaction_threshold {
            debug!(log_len = log.len, "Compacting kv log");
            let state = self.current();
            let fresh = self
                .replace_checkpoint(log.generation + 1, self.applied_index(), &state)
                .map_err(|e| RsmError::Sync(format!("compact: {e}")))?;
            std::mem::replace(log, fresh).retire();
        }
        Ok(())
    }

    fn hash(&self) -> u64 {
        self.current().hash()
    }

    fn prepare_snapshot(&self) -> RsmResult<DiskView> {
        self.ensure_open()?;
        let _log = self.log.lock();
        Ok(DiskView {
            index: self.applied_index(),
            state: self.current(),
        })
    }

    fn save_snapshot(
        &self,
        ctx: DiskView,
        writer: &mut dyn Write,
        stop: &StopSignal,
    ) -> RsmResult<SnapshotSaved> {
        let mut sink = SnapshotSink::new(writer, stop).with_chunk_size(self.config.snapshot_chunk_size);
        sink.write_u64(ctx.index)
            .map_err(|e| e.into_save_error())?;
        ctx.state
            .encode_to(&mut sink)
            .map_err(|e| e.into_save_error())?;
        let written = sink.finish().map_err(|e| e.into_save_error())?;
        Ok(SnapshotSaved::new(written))
    }

    fn recover_from_snapshot(&self, reader: &mut dyn Read, stop: &StopSignal) -> RsmResult<()> {
        let mut source =
            SnapshotSource::new(reader, stop).with_chunk_size(self.config.snapshot_chunk_size);
        let index = source.read_u64().map_err(|e| e.into_recover_error())?;
        let state = KvState::decode_from(&mut source, self.config.max_record_size)
            .map_err(|e| e.into_recover_error())?;
        source.expect_end().map_err(|e| e.into_recover_error())?;

        let mut log = self.log.lock();
        fs::create_dir_all(&self.dir)
            .map_err(|e| RsmError::SnapshotRecover(format!("create dir: {e}")))?;
        let generation = match log.as_ref() {
            Some(log) => log.generation,
            None => self.highest_generation(),
        } + 1;
        let fresh = self
            .replace_checkpoint(generation, index, &state)
            .map_err(|e| RsmError::SnapshotRecover(format!("write checkpoint: {e}")))?;
        // Before `open` the fresh log is picked up from disk instead.
        if let Some(previous) = log.take() {
            *log = Some(fresh);
            previous.retire();
        }

        *self.state.write() = Arc::new(state);
        self.applied.store(index, Ordering::Release);
        info!(dir = %self.dir.display(), index, generation, "Recovered disk kv from snapshot");
        Ok(())
    }
}

/// Write a checkpoint to `path` and fsync it.
fn write_checkpoint(path: &Path, generation: u64, index: u64, state: &KvState) -> io::Result<()> {
    let stop = StopSignal::new();
    let mut body: Vec<u8> = Vec::new();
    let mut sink = SnapshotSink::new(&mut body, &stop);
    sink.write_u64(generation).map_err(io::Error::other)?;
    sink.write_u64(index).map_err(io::Error::other)?;
    state.encode_to(&mut sink).map_err(io::Error::other)?;
    sink.finish().map_err(io::Error::other)?;

    let mut contents = Vec::with_capacity(CHECKPOINT_HEADER_SIZE + body.len());
    contents.extend_from_slice(&CHECKPOINT_MAGIC.to_le_bytes());
    contents.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
    contents.extend_from_slice(&(body.len() as u64).to_le_bytes());
    contents.extend_from_slice(&body);

    let mut file = File::create(path)?;
    file.write_all(&contents)?;
    file.sync_all()
}

/// Generation recorded in the checkpoint header, without verifying the rest.
fn checkpoint_generation(dir: &Path) -> Option<u64> {
    let mut buf = [0u8; CHECKPOINT_HEADER_SIZE + 8];
    File::open(dir.join(CHECKPOINT_FILE))
        .ok()?
        .read_exact(&mut buf)
        .ok()?;
    (u32_at(&buf, 0) == CHECKPOINT_MAGIC).then(|| u64_at(&buf, CHECKPOINT_HEADER_SIZE))
}

fn read_checkpoint(dir: &Path, max_record: usize) -> RsmResult<Option<Checkpoint>> {
    let path = dir.join(CHECKPOINT_FILE);
    let contents = match fs::read(&path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(RsmError::Open(format!("read {}: {e}", path.display()))),
    };
    let corrupt = |what: &str| RsmError::Open(format!("checkpoint {}: {what}", path.display()));

    if contents.len() < CHECKPOINT_HEADER_SIZE {
        return Err(corrupt("truncated header"));
    }
    if u32_at(&contents, 0) != CHECKPOINT_MAGIC {
        return Err(corrupt("bad magic"));
    }
    let body = &contents[CHECKPOINT_HEADER_SIZE..];
    if u64_at(&contents, 8) != body.len() as u64 {
        return Err(corrupt("length mismatch"));
    }
    if crc32fast::hash(body) != u32_at(&contents, 4) {
        return Err(corrupt("checksum mismatch"));
    }

    let stop = StopSignal::new();
    let mut reader = body;
    let mut source = SnapshotSource::new(&mut reader, &stop);
    decode_checkpoint_body(&mut source, max_record)
        .map(Some)
        .map_err(|e| corrupt(&e.to_string()))
}

fn decode_checkpoint_body(
    source: &mut SnapshotSource<'_>,
    max_record: usize,
) -> SnapshotResult<Checkpoint> {
    let generation = source.read_u64()?;
    let index = source.read_u64()?;
    let state = KvState::decode_from(source, max_record)?;
    source.expect_end()?;
    Ok(Checkpoint {
        generation,
        index,
        state,
    })
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Best-effort removal of a file nothing refers to any more.
fn discard(path: &Path) {
    if let Err(e) = remove_if_exists(path) {
        warn!(path = %path.display(), error = %e, "Failed to remove kv file");
    }
}
