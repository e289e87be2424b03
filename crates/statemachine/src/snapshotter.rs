//! Local snapshot store.
//!
//! ## Directory Layout
//!
//! ```text
//! {snapshot_dir}/
//! ├── snapshot-00000000000000000042/
//! │   ├── snapshot.data          # header + payload written by the machine
//! │   ├── manifest.json          # SnapshotMeta
//! │   └── external-{file_id}     # files registered through the collection
//! └── snapshot-00000000000000000057.generating/   # in progress
//! ```
//!
//! A snapshot is assembled under a `.generating` name and renamed into place
//! only once data, external files and manifest are all on disk. A failed or
//! cancelled save removes its generating directory, and leftovers from a
//! crash are removed when the store is opened.

use crate::result::SnapshotSaved;
use common::{GroupId, ReplicaId, RsmError, RsmResult, StateMachineKind};
use serde::{Deserialize, Serialize};
use snapshot::{SnapshotFile, SnapshotFileCollection, SnapshotFileReader, SnapshotFileWriter};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const DATA_FILE: &str = "snapshot.data";
const MANIFEST_FILE: &str = "manifest.json";
const DIR_PREFIX: &str = "snapshot-";
const GENERATING_SUFFIX: &str = ".generating";

/// An external file as recorded in the manifest, relative to the snapshot
/// directory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestFile {
    pub file_id: u64,
    pub name: String,
    pub metadata: Vec<u8>,
}

/// Description of one completed snapshot, stored as `manifest.json`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub group_id: GroupId,
    pub replica_id: ReplicaId,
    pub index: u64,
    pub kind: StateMachineKind,
    pub payload_len: u64,
    pub payload_checksum: u32,
    pub files: Vec<ManifestFile>,
    /// Directory the manifest was loaded from.
    #[serde(skip)]
    pub dir: PathBuf,
}

impl SnapshotMeta {
    pub fn data_path(&self) -> PathBuf {
        self.dir.join(DATA_FILE)
    }

    /// External files with paths resolved inside the snapshot directory.
    pub fn external_files(&self) -> Vec<SnapshotFile> {
        self.files
            .iter()
            .map(|f| SnapshotFile::new(f.file_id, self.dir.join(&f.name), f.metadata.clone()))
            .collect()
    }
}

/// Snapshot store for one replica.
#[derive(Debug)]
pub struct Snapshotter {
    dir: PathBuf,
    group_id: GroupId,
    replica_id: ReplicaId,
    keep: usize,
}

impl Snapshotter {
    /// Open (creating if needed) the store in `dir`, keeping at most `keep`
    /// completed snapshots.
    pub fn open(
        dir: impl Into<PathBuf>,
        group_id: GroupId,
        replica_id: ReplicaId,
        keep: usize,
    ) -> RsmResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_dir() && file_name(&path).ends_with(GENERATING_SUFFIX) {
                warn!(path = %path.display(), "Removing incomplete snapshot");
                fs::remove_dir_all(&path)?;
            }
        }

        Ok(Self {
            dir,
            group_id,
            replica_id,
            keep: keep.max(1),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Produce a snapshot at `index` by running `save` against a fresh data
    /// file and external file collection.
    ///
    /// The bytes `save` reports must match what reached the file. On any
    /// error the partially written snapshot is discarded.
    pub fn save<F>(&self, kind: StateMachineKind, index: u64, save: F) -> RsmResult<SnapshotMeta>
    where
        F: FnOnce(&mut dyn Write, &mut SnapshotFileCollection) -> RsmResult<SnapshotSaved>,
    {
        let final_dir = self.dir.join(snapshot_dir_name(index));
        if final_dir.exists() {
            return Err(RsmError::SnapshotSave(format!(
                "snapshot at index {index} already exists"
            )));
        }

        let generating = self
            .dir
            .join(format!("{}{GENERATING_SUFFIX}", snapshot_dir_name(index)));
        if generating.exists() {
            fs::remove_dir_all(&generating)?;
        }
        fs::create_dir_all(&generating)?;

        match self.build(&generating, kind, index, save) {
            Ok(mut meta) => {
                fs::rename(&generating, &final_dir)
                    .and_then(|()| File::open(&self.dir)?.sync_all())
                    .map_err(|e| RsmError::SnapshotSave(format!("publish snapshot: {e}")))?;
                meta.dir = final_dir;
                info!(
                    group = %self.group_id,
                    replica = %self.replica_id,
                    index,
                    %kind,
                    payload_len = meta.payload_len,
                    files = meta.files.len(),
                    "Snapshot saved"
                );
                self.prune()?;
                Ok(meta)
            }
            Err(err) => {
                if err.is_cancelled() {
                    info!(index, "Snapshot save cancelled");
                } else {
                    warn!(index, error = %err, "Snapshot save failed");
                }
                if let Err(e) = fs::remove_dir_all(&generating) {
                    warn!(path = %generating.display(), error = %e, "Failed to remove partial snapshot");
                }
                Err(err)
            }
        }
    }

    fn build<F>(
        &self,
        dir: &Path,
        kind: StateMachineKind,
        index: u64,
        save: F,
    ) -> RsmResult<SnapshotMeta>
    where
        F: FnOnce(&mut dyn Write, &mut SnapshotFileCollection) -> RsmResult<SnapshotSaved>,
    {
        let mut writer =
            SnapshotFileWriter::create(dir.join(DATA_FILE)).map_err(|e| e.into_save_error())?;
        let mut collection = SnapshotFileCollection::new();
        let saved = save(&mut writer, &mut collection)?;

        if saved.bytes_written != writer.payload_len() {
            return Err(RsmError::SnapshotSave(format!(
                "machine reported {} bytes, file holds {}",
                saved.bytes_written,
                writer.payload_len()
            )));
        }
        let header = writer
            .finish(kind, index)
            .map_err(|e| e.into_save_error())?;

        let mut files = Vec::with_capacity(collection.len());
        for file in collection.into_files() {
            let name = format!("external-{}", file.file_id);
            fs::copy(file.path(), dir.join(&name)).map_err(|e| {
                RsmError::SnapshotSave(format!("copy {}: {e}", file.path().display()))
            })?;
            files.push(ManifestFile {
                file_id: file.file_id,
                name,
                metadata: file.metadata,
            });
        }

        let meta = SnapshotMeta {
            group_id: self.group_id,
            replica_id: self.replica_id,
            index,
            kind,
            payload_len: header.payload_len,
            payload_checksum: header.payload_checksum,
            files,
            dir: dir.to_path_buf(),
        };
        let manifest = serde_json::to_vec_pretty(&meta)
            .map_err(|e| RsmError::SnapshotSave(format!("encode manifest: {e}")))?;
        let mut manifest_file = File::create(dir.join(MANIFEST_FILE))?;
        manifest_file.write_all(&manifest)?;
        manifest_file.sync_all()?;

        Ok(meta)
    }

    /// Completed snapshots, oldest first. Directories without a readable
    /// manifest are skipped.
    pub fn list(&self) -> RsmResult<Vec<SnapshotMeta>> {
        let mut snapshots = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let name = file_name(&path);
            if !path.is_dir() || !name.starts_with(DIR_PREFIX) || name.ends_with(GENERATING_SUFFIX)
            {
                continue;
            }
            match Self::load(&path) {
                Ok(meta) => snapshots.push(meta),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable snapshot"),
            }
        }
        snapshots.sort_by_key(|meta| meta.index);
        Ok(snapshots)
    }

    pub fn latest(&self) -> RsmResult<Option<SnapshotMeta>> {
        Ok(self.list()?.pop())
    }

    /// Read the manifest of the snapshot stored in `dir`.
    pub fn load(dir: &Path) -> RsmResult<SnapshotMeta> {
        let path = dir.join(MANIFEST_FILE);
        let bytes = fs::read(&path)
            .map_err(|e| RsmError::SnapshotRecover(format!("read {}: {e}", path.display())))?;
        let mut meta: SnapshotMeta = serde_json::from_slice(&bytes)
            .map_err(|e| RsmError::SnapshotRecover(format!("parse {}: {e}", path.display())))?;
        meta.dir = dir.to_path_buf();
        Ok(meta)
    }

    /// Open the verified payload of `meta`. The data file must agree with
    /// its manifest on index, kind and checksum.
    pub fn open_reader(&self, meta: &SnapshotMeta) -> RsmResult<SnapshotFileReader> {
        let reader =
            SnapshotFileReader::open(meta.data_path()).map_err(|e| e.into_recover_error())?;
        let header = reader.header();
        if header.index != meta.index
            || header.kind != meta.kind
            || header.payload_checksum != meta.payload_checksum
        {
            return Err(RsmError::SnapshotRecover(format!(
                "{} does not match its manifest",
                meta.data_path().display()
            )));
        }
        Ok(reader)
    }

    fn prune(&self) -> RsmResult<()> {
        let snapshots = self.list()?;
        let excess = snapshots.len().saturating_sub(self.keep);
        for meta in &snapshots[..excess] {
            debug!(index = meta.index, path = %meta.dir.display(), "Pruning snapshot");
            fs::remove_dir_all(&meta.dir)?;
        }
        Ok(())
    }
}

fn snapshot_dir_name(index: u64) -> String {
    format!("{DIR_PREFIX}{index:020}")
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
