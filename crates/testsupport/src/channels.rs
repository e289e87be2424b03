//! Fault-injecting snapshot channels.
//!
//! These wrap an in-memory buffer and misbehave in one specific way, so tests
//! can check that a machine maps each failure to the right status and never
//! touches its applied state on a failed recovery.

use snapshot::StopSignal;
use std::io::{self, Read, Write};

/// Writer that accepts `capacity` bytes and then reports `Ok(0)`.
#[derive(Debug, Default)]
pub struct FailingWriter {
    pub data: Vec<u8>,
    capacity: usize,
}

impl FailingWriter {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Vec::new(),
            capacity,
        }
    }
}

impl Write for FailingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = buf.len().min(self.capacity - self.data.len());
        self.data.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Writer that raises `stop` once `after` bytes have gone through, as if a
/// shutdown arrived in the middle of a save.
#[derive(Debug)]
pub struct StopAfterWriter {
    pub data: Vec<u8>,
    after: usize,
    stop: StopSignal,
}

impl StopAfterWriter {
    pub fn new(after: usize, stop: StopSignal) -> Self {
        Self {
            data: Vec::new(),
            after,
            stop,
        }
    }
}

impl Write for StopAfterWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.data.extend_from_slice(buf);
        if self.data.len() >= self.after {
            self.stop.stop();
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Reader over a prefix of a valid payload.
#[derive(Debug)]
pub struct TruncatedReader<'a> {
    inner: &'a [u8],
}

impl<'a> TruncatedReader<'a> {
    /// Serve only the first `keep` bytes of `data`.
    pub fn new(data: &'a [u8], keep: usize) -> Self {
        Self {
            inner: &data[..keep.min(data.len())],
        }
    }
}

impl Read for TruncatedReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

/// Reader that fails with an I/O error after `after` bytes.
#[derive(Debug)]
pub struct BrokenReader<'a> {
    inner: &'a [u8],
    remaining: usize,
}

impl<'a> BrokenReader<'a> {
    pub fn new(data: &'a [u8], after: usize) -> Self {
        Self {
            inner: data,
            remaining: after,
        }
    }
}

impl Read for BrokenReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            return Err(io::Error::other("injected read failure"));
        }
        let want = buf.len().min(self.remaining);
        let n = self.inner.read(&mut buf[..want])?;
        self.remaining -= n;
        Ok(n)
    }
}
