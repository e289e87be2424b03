//! External files referenced by a snapshot instead of being inlined in the
//! byte stream (large blobs, SST files and the like).

use crate::error::{SnapshotError, SnapshotResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A file that travels alongside a snapshot payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotFile {
    /// Identifier chosen by the state machine, unique within one snapshot.
    pub file_id: u64,
    /// Location of the file. During save this is where the state machine
    /// left it; during recovery it points into the snapshot directory.
    pub path: PathBuf,
    /// Opaque bytes the state machine wants back on recovery.
    pub metadata: Vec<u8>,
}

impl SnapshotFile {
    pub fn new(file_id: u64, path: impl Into<PathBuf>, metadata: impl Into<Vec<u8>>) -> Self {
        Self {
            file_id,
            path: path.into(),
            metadata: metadata.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Files registered by a state machine while saving a snapshot.
#[derive(Clone, Debug, Default)]
pub struct SnapshotFileCollection {
    files: Vec<SnapshotFile>,
}

impl SnapshotFileCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an external file. Ids must be unique within the snapshot.
    pub fn add_file(
        &mut self,
        file_id: u64,
        path: impl Into<PathBuf>,
        metadata: impl Into<Vec<u8>>,
    ) -> SnapshotResult<()> {
        if self.files.iter().any(|f| f.file_id == file_id) {
            return Err(SnapshotError::DuplicateFile(file_id));
        }
        self.files.push(SnapshotFile::new(file_id, path, metadata));
        Ok(())
    }

    pub fn files(&self) -> &[SnapshotFile] {
        &self.files
    }

    pub fn into_files(self) -> Vec<SnapshotFile> {
        self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_preserves_insertion_order() {
        let mut files = SnapshotFileCollection::new();
        files.add_file(2, "/tmp/b.sst", b"meta-b".to_vec()).unwrap();
        files.add_file(1, "/tmp/a.sst", Vec::<u8>::new()).unwrap();

        let ids: Vec<u64> = files.files().iter().map(|f| f.file_id).collect();
        assert_eq!(ids, vec![2, 1]);
        assert_eq!(files.len(), 2);
        assert!(!files.is_empty());
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut files = SnapshotFileCollection::new();
        files.add_file(7, "/tmp/a", Vec::<u8>::new()).unwrap();
        assert!(matches!(
            files.add_file(7, "/tmp/b", Vec::<u8>::new()),
            Err(SnapshotError::DuplicateFile(7))
        ));
        assert_eq!(files.len(), 1);
    }
}
