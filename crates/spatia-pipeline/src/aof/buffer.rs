//! In-memory AOF buffer
//!
//! Appends happen inside the exclusive section and never touch the disk;
//! the flusher drains the buffer outside it.

use bytes::{Bytes, BytesMut};

/// Caller's hint about how soon appended bytes should reach disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushHint {
    /// Next periodic flush is fine
    Deferred,
    /// Wake the flusher right away
    Now,
}

/// Append-only sink for encoded log entries.
///
/// `append` must not block on I/O.
pub trait LogAppend {
    fn append(&mut self, payload: &[u8], hint: FlushHint);
}

#[derive(Debug)]
pub struct AofBuffer {
    buf: BytesMut,
    threshold: usize,
    flush_requested: bool,
}

impl AofBuffer {
    pub fn new(threshold: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(threshold.min(64 * 1024)),
            threshold: threshold.max(1),
            flush_requested: false,
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// A `Now` hint was seen or the threshold was reached since the last take
    pub fn wants_flush(&self) -> bool {
        self.flush_requested
    }

    /// Drain everything buffered so far
    pub fn take(&mut self) -> Bytes {
        self.flush_requested = false;
        self.buf.split().freeze()
    }

    /// Put bytes from a failed flush back in front of anything appended since
    pub fn restore(&mut self, failed: Bytes) {
        if failed.is_empty() {
            return;
        }
        let mut merged = BytesMut::with_capacity(failed.len() + self.buf.len());
        merged.extend_from_slice(&failed);
        merged.extend_from_slice(&self.buf);
        self.buf = merged;
        if self.buf.len() >= self.threshold {
            self.flush_requested = true;
        }
    }
}

impl LogAppend for AofBuffer {
    fn append(&mut self, payload: &[u8], hint: FlushHint) {
        self.buf.extend_from_slice(payload);
        if hint == FlushHint::Now || self.buf.len() >= self.threshold {
            self.flush_requested = true;
        }
    }
}
