//! Snapshot files on the local disk.
//!
//! `SnapshotFileWriter` reserves room for the header, streams the payload
//! while hashing it, then writes the real header and fsyncs in `finish`.
//! `SnapshotFileReader` validates header and payload checksum when opened,
//! before a single payload byte reaches a state machine, so a corrupt file is
//! rejected without touching applied state.

use crate::channel::DEFAULT_CHUNK_SIZE;
use crate::error::{SnapshotError, SnapshotResult};
use crate::header::{SnapshotHeader, HEADER_SIZE};
use common::StateMachineKind;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Take, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Streaming writer for a snapshot file.
pub struct SnapshotFileWriter {
    path: PathBuf,
    file: BufWriter<File>,
    hasher: crc32fast::Hasher,
    payload_len: u64,
}

impl SnapshotFileWriter {
    /// Create (or truncate) the file at `path` and reserve the header.
    pub fn create(path: impl AsRef<Path>) -> SnapshotResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        let mut file = BufWriter::new(file);
        file.write_all(&[0u8; HEADER_SIZE])?;

        debug!(path = %path.display(), "Creating snapshot file");

        Ok(Self {
            path,
            file,
            hasher: crc32fast::Hasher::new(),
            payload_len: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn payload_len(&self) -> u64 {
        self.payload_len
    }

    /// Write the final header and fsync the file.
    pub fn finish(self, kind: StateMachineKind, index: u64) -> SnapshotResult<SnapshotHeader> {
        let Self {
            path,
            mut file,
            hasher,
            payload_len,
        } = self;

        file.flush()?;
        let mut file = file.into_inner().map_err(|e| e.into_error())?;

        let header = SnapshotHeader::new(kind, index, payload_len, hasher.finalize());
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&header.encode())?;
        file.sync_all()?;

        info!(
            path = %path.display(),
            %kind,
            index,
            payload_len,
            "Snapshot file written"
        );

        Ok(header)
    }
}

impl Write for SnapshotFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.file.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.payload_len += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// Verified reader over a snapshot file's payload.
pub struct SnapshotFileReader {
    path: PathBuf,
    header: SnapshotHeader,
    payload: Take<BufReader<File>>,
}

impl SnapshotFileReader {
    /// Open `path`, validating the header, the payload length and the
    /// payload checksum. The returned reader yields exactly the payload.
    pub fn open(path: impl AsRef<Path>) -> SnapshotResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let header = read_header(&mut reader, file_len)?;

        let expected_len = (HEADER_SIZE as u64)
            .checked_add(header.payload_len)
            .ok_or_else(|| {
                SnapshotError::Corrupt(format!("payload length {} overflows", header.payload_len))
            })?;
        if file_len < expected_len {
            return Err(SnapshotError::ShortRead {
                expected: header.payload_len as usize,
                read: (file_len - HEADER_SIZE as u64) as usize,
            });
        }
        if file_len > expected_len {
            return Err(SnapshotError::Corrupt(format!(
                "{} trailing bytes after payload",
                file_len - expected_len
            )));
        }

        let mut hasher = crc32fast::Hasher::new();
        let mut chunk = vec![0u8; DEFAULT_CHUNK_SIZE];
        let mut remaining = header.payload_len;
        while remaining > 0 {
            let want = remaining.min(chunk.len() as u64) as usize;
            reader.read_exact(&mut chunk[..want])?;
            hasher.update(&chunk[..want]);
            remaining -= want as u64;
        }
        let actual = hasher.finalize();
        if actual != header.payload_checksum {
            return Err(SnapshotError::ChecksumMismatch {
                what: "payload",
                expected: header.payload_checksum,
                actual,
            });
        }

        reader.seek(SeekFrom::Start(HEADER_SIZE as u64))?;
        debug!(path = %path.display(), index = header.index, "Opened snapshot file");

        let payload = reader.take(header.payload_len);
        Ok(Self {
            path,
            header,
            payload,
        })
    }

    /// Decode only the header, without verifying the payload.
    pub fn read_header(path: impl AsRef<Path>) -> SnapshotResult<SnapshotHeader> {
        let file = File::open(path.as_ref())?;
        let file_len = file.metadata()?.len();
        read_header(&mut BufReader::new(file), file_len)
    }

    pub fn header(&self) -> &SnapshotHeader {
        &self.header
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Read for SnapshotFileReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.payload.read(buf)
    }
}

fn read_header(reader: &mut impl Read, file_len: u64) -> SnapshotResult<SnapshotHeader> {
    if file_len < HEADER_SIZE as u64 {
        return Err(SnapshotError::ShortRead {
            expected: HEADER_SIZE,
            read: file_len as usize,
        });
    }
    let mut buf = [0u8; HEADER_SIZE];
    reader.read_exact(&mut buf)?;
    SnapshotHeader::decode(&buf)
}
