//! Fixed-size byte buffers backing one subgraph response.
//!
//! The transport hands the payload over as pooled 128 KiB buffers plus an
//! exact total length. A scalar value may straddle the boundary between
//! two buffers; [`ChunkedBuffers::slice`] resolves such a span with a
//! one-time concatenation and hands back borrowed bytes in every other
//! case.

use std::borrow::Cow;

use bytes::Bytes;

use crate::error::{Result, WeftError};

/// Fixed byte capacity of one input buffer.
pub const BUFFER_SIZE: usize = 128 * 1024;

/// One or more fixed-size byte buffers addressed as a single logical run.
pub struct ChunkedBuffers {
    buffers: Vec<Bytes>,
    total_len: usize,
}

impl ChunkedBuffers {
    /// Wraps transport buffers.
    ///
    /// Every buffer except the last must hold exactly [`BUFFER_SIZE`]
    /// bytes; `last_buffer_len` gives the number of valid bytes in the
    /// final buffer (pooled buffers are handed over at full capacity).
    pub fn new(buffers: Vec<Bytes>, last_buffer_len: usize) -> Result<Self> {
        if buffers.is_empty() {
            if last_buffer_len != 0 {
                return Err(WeftError::InvalidArgument(
                    "no buffers supplied but last buffer length is non-zero".into(),
                ));
            }
            return Ok(Self {
                buffers,
                total_len: 0,
            });
        }
        for (index, buffer) in buffers[..buffers.len() - 1].iter().enumerate() {
            if buffer.len() != BUFFER_SIZE {
                return Err(WeftError::InvalidArgument(format!(
                    "buffer {index} holds {} bytes, expected {BUFFER_SIZE}",
                    buffer.len()
                )));
            }
        }
        let last = buffers.last().expect("at least one buffer");
        if last_buffer_len > last.len() {
            return Err(WeftError::InvalidArgument(format!(
                "last buffer length {last_buffer_len} exceeds buffer size {}",
                last.len()
            )));
        }
        let total_len = (buffers.len() - 1) * BUFFER_SIZE + last_buffer_len;
        Ok(Self { buffers, total_len })
    }

    /// Wraps a single contiguous payload, splitting it into fixed-size
    /// buffers. Splitting `Bytes` is a reference-count bump, not a copy.
    pub fn from_contiguous(payload: Bytes) -> Self {
        let total_len = payload.len();
        let mut buffers = Vec::with_capacity(total_len / BUFFER_SIZE + 1);
        let mut rest = payload;
        while rest.len() > BUFFER_SIZE {
            buffers.push(rest.split_to(BUFFER_SIZE));
        }
        buffers.push(rest);
        Self { buffers, total_len }
    }

    /// Total number of valid bytes across all buffers.
    pub fn total_len(&self) -> usize {
        self.total_len
    }

    /// The byte at logical position `pos`, if in range.
    pub fn byte_at(&self, pos: usize) -> Option<u8> {
        if pos >= self.total_len {
            return None;
        }
        Some(self.buffers[pos / BUFFER_SIZE][pos % BUFFER_SIZE])
    }

    /// The longest contiguous run starting at `pos`, clipped to the valid
    /// length. Scanning hot paths iterate these runs instead of calling
    /// [`ChunkedBuffers::byte_at`] per byte.
    pub fn contiguous_run(&self, pos: usize) -> &[u8] {
        if pos >= self.total_len {
            return &[];
        }
        let buffer = &self.buffers[pos / BUFFER_SIZE];
        let start = pos % BUFFER_SIZE;
        let end = buffer.len().min(self.total_len - (pos / BUFFER_SIZE) * BUFFER_SIZE);
        &buffer[start..end]
    }

    /// Resolves the span `[pos, pos + len)`.
    ///
    /// Returns borrowed bytes when the span lies inside one buffer and an
    /// owned concatenation when it straddles a boundary; callers cannot
    /// tell the difference.
    pub fn slice(&self, pos: usize, len: usize) -> Result<Cow<'_, [u8]>> {
        let end = pos.checked_add(len).ok_or_else(|| {
            WeftError::InvalidArgument("byte span overflows".into())
        })?;
        if end > self.total_len {
            return Err(WeftError::InvalidArgument(format!(
                "byte span {pos}..{end} exceeds document length {}",
                self.total_len
            )));
        }
        let first = pos / BUFFER_SIZE;
        let offset = pos % BUFFER_SIZE;
        if offset + len <= self.buffers[first].len() {
            return Ok(Cow::Borrowed(&self.buffers[first][offset..offset + len]));
        }
        let mut assembled = Vec::with_capacity(len);
        let mut cursor = pos;
        while cursor < end {
            let run = self.contiguous_run(cursor);
            let take = run.len().min(end - cursor);
            assembled.extend_from_slice(&run[..take]);
            cursor += take;
        }
        Ok(Cow::Owned(assembled))
    }
}
