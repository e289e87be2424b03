//! Chunked, cancellable byte channel used by snapshot save and restore.
//!
//! `SnapshotSink` and `SnapshotSource` wrap any `io::Write` / `io::Read`.
//! Every transfer is split into chunks of at most `chunk_size` bytes and the
//! stop signal is polled before each chunk, so a large snapshot can be
//! abandoned promptly without leaving the channel in an undefined state.

use crate::error::{SnapshotError, SnapshotResult};
use crate::stop::StopSignal;
use std::io::{self, Read, Write};

/// Default number of bytes moved between two stop-signal polls.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Write side of the snapshot channel.
pub struct SnapshotSink<'a> {
    inner: &'a mut dyn Write,
    stop: &'a StopSignal,
    chunk_size: usize,
    written: u64,
}

impl<'a> SnapshotSink<'a> {
    pub fn new(inner: &'a mut dyn Write, stop: &'a StopSignal) -> Self {
        Self {
            inner,
            stop,
            chunk_size: DEFAULT_CHUNK_SIZE,
            written: 0,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Bytes accepted by the underlying writer so far.
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Write all of `buf`, chunk by chunk.
    ///
    /// A writer that accepts zero bytes is reported as a short write.
    pub fn write_all(&mut self, mut buf: &[u8]) -> SnapshotResult<()> {
        while !buf.is_empty() {
            self.stop.check()?;
            let len = buf.len().min(self.chunk_size);
            let (chunk, rest) = buf.split_at(len);

            let mut offset = 0;
            while offset < chunk.len() {
                match self.inner.write(&chunk[offset..]) {
                    Ok(0) => {
                        return Err(SnapshotError::ShortWrite {
                            expected: chunk.len(),
                            written: offset,
                        })
                    }
                    Ok(n) => {
                        offset += n;
                        self.written += n as u64;
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e.into()),
                }
            }
            buf = rest;
        }
        Ok(())
    }

    pub fn write_u64(&mut self, value: u64) -> SnapshotResult<()> {
        self.write_all(&value.to_le_bytes())
    }

    /// Write a length-prefixed byte string.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> SnapshotResult<()> {
        self.write_u64(bytes.len() as u64)?;
        self.write_all(bytes)
    }

    /// Flush the writer and return the number of bytes written.
    ///
    /// A stop requested while the last chunk was in flight still cancels
    /// the save: a cancelled snapshot never reports success.
    pub fn finish(self) -> SnapshotResult<u64> {
        self.inner.flush()?;
        self.stop.check()?;
        Ok(self.written)
    }
}

/// Read side of the snapshot channel.
pub struct SnapshotSource<'a> {
    inner: &'a mut dyn Read,
    stop: &'a StopSignal,
    chunk_size: usize,
    read: u64,
}

impl<'a> SnapshotSource<'a> {
    pub fn new(inner: &'a mut dyn Read, stop: &'a StopSignal) -> Self {
        Self {
            inner,
            stop,
            chunk_size: DEFAULT_CHUNK_SIZE,
            read: 0,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn bytes_read(&self) -> u64 {
        self.read
    }

    /// Fill `buf` completely. Hitting end of stream first is a short read.
    pub fn read_exact(&mut self, buf: &mut [u8]) -> SnapshotResult<()> {
        let expected = buf.len();
        let mut filled = 0;
        for chunk in buf.chunks_mut(self.chunk_size) {
            self.stop.check()?;
            let mut offset = 0;
            while offset < chunk.len() {
                match self.inner.read(&mut chunk[offset..]) {
                    Ok(0) => {
                        return Err(SnapshotError::ShortRead {
                            expected,
                            read: filled + offset,
                        })
                    }
                    Ok(n) => {
                        offset += n;
                        self.read += n as u64;
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e.into()),
                }
            }
            filled += chunk.len();
        }
        Ok(())
    }

    pub fn read_u64(&mut self) -> SnapshotResult<u64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    /// Read a length-prefixed byte string of at most `max` bytes.
    pub fn read_bytes(&mut self, max: usize) -> SnapshotResult<Vec<u8>> {
        let len = self.read_u64()?;
        if len > max as u64 {
            return Err(SnapshotError::RecordTooLarge { len, max });
        }
        let mut buf = vec![0u8; len as usize];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Drain the stream to its end.
    pub fn read_to_end(&mut self) -> SnapshotResult<Vec<u8>> {
        let mut out = Vec::new();
        let mut chunk = vec![0u8; self.chunk_size];
        loop {
            self.stop.check()?;
            match self.inner.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    out.extend_from_slice(&chunk[..n]);
                    self.read += n as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(out)
    }

    /// Fail unless the stream is exhausted. Trailing bytes mean the payload
    /// was produced by something other than the matching save.
    pub fn expect_end(&mut self) -> SnapshotResult<()> {
        self.stop.check()?;
        let mut probe = [0u8; 1];
        loop {
            match self.inner.read(&mut probe) {
                Ok(0) => return Ok(()),
                Ok(_) => return Err(SnapshotError::Corrupt("trailing bytes after payload".into())),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}
