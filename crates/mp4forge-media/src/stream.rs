//! Incrementally appended input.
//!
//! [`StreamBuffer`] holds the chunks a caller has appended so far, keyed by
//! their file position. The parser asks for byte ranges by file position and
//! gets `None` when a range has not fully arrived yet.

use crate::{Error, Result};
use bytes::{Bytes, BytesMut};
use std::ops::Range;

#[derive(Debug, Clone)]
struct Chunk {
    /// File position of `data[0]`.
    start: u64,
    data: Bytes,
    /// Leading bytes of `data` already consumed by the parser.
    used: usize,
}

impl Chunk {
    fn end(&self) -> u64 {
        self.start + self.data.len() as u64
    }
}

/// Ordered set of appended input chunks.
#[derive(Debug, Clone, Default)]
pub struct StreamBuffer {
    chunks: Vec<Chunk>,
    /// File position right after the last appended byte.
    end: u64,
    /// Everything below this position has been released.
    released: u64,
}

impl StreamBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the next chunk right after the current end of input.
    pub fn append(&mut self, data: impl Into<Bytes>) {
        let start = self.end;
        self.push(start, data.into());
    }

    /// Append a chunk at an explicit file position. Gaps are allowed;
    /// positions before the current end of input are rejected.
    pub fn append_at(&mut self, position: u64, data: impl Into<Bytes>) -> Result<()> {
        if position < self.end {
            return Err(Error::OutOfOrderAppend {
                expected: self.end,
                got: position,
            });
        }
        self.push(position, data.into());
        Ok(())
    }

    fn push(&mut self, start: u64, data: Bytes) {
        if data.is_empty() {
            return;
        }
        self.end = start + data.len() as u64;
        self.chunks.push(Chunk {
            start,
            data,
            used: 0,
        });
    }

    /// File position right after the last appended byte.
    pub fn end_position(&self) -> u64 {
        self.end
    }

    /// Position below which all input has been released.
    pub fn released_position(&self) -> u64 {
        self.released
    }

    /// Number of bytes currently held in memory.
    pub fn buffered_len(&self) -> usize {
        self.chunks.iter().map(|c| c.data.len()).sum()
    }

    /// Number of chunks currently held.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    fn chunk_index(&self, position: u64) -> Option<usize> {
        let idx = self.chunks.partition_point(|c| c.end() <= position);
        self.chunks
            .get(idx)
            .filter(|c| c.start <= position)
            .map(|_| idx)
    }

    /// The maximal range available starting at `from`, spanning adjacent
    /// chunks. Empty when the byte at `from` is missing.
    pub fn find_contiguous_run(&self, from: u64) -> Range<u64> {
        let Some(mut idx) = self.chunk_index(from) else {
            return from..from;
        };
        let mut end = self.chunks[idx].end();
        while let Some(next) = self.chunks.get(idx + 1) {
            if next.start != end {
                break;
            }
            end = next.end();
            idx += 1;
        }
        from..end
    }

    /// Whether `len` bytes starting at `position` are all buffered.
    pub fn has_range(&self, position: u64, len: u64) -> bool {
        len == 0 || self.find_contiguous_run(position).end >= position + len
    }

    /// Read `len` bytes at `position`, or `None` if any of them is missing.
    ///
    /// A range inside a single chunk is returned without copying.
    pub fn read(&self, position: u64, len: u64) -> Option<Bytes> {
        if len == 0 {
            return Some(Bytes::new());
        }
        if !self.has_range(position, len) {
            return None;
        }
        let mut idx = self.chunk_index(position)?;
        let first = &self.chunks[idx];
        let offset = (position - first.start) as usize;
        if position + len <= first.end() {
            return Some(first.data.slice(offset..offset + len as usize));
        }

        let mut out = BytesMut::with_capacity(len as usize);
        out.extend_from_slice(&first.data[offset..]);
        while (out.len() as u64) < len {
            idx += 1;
            let chunk = &self.chunks[idx];
            let want = (len as usize - out.len()).min(chunk.data.len());
            out.extend_from_slice(&chunk.data[..want]);
        }
        Some(out.freeze())
    }

    /// Mark everything below `position` as consumed and drop what is no
    /// longer needed. Fully consumed chunks are removed, a partially consumed
    /// chunk is trimmed to its unconsumed tail.
    pub fn release_consumed_through(&mut self, position: u64) {
        if position <= self.released {
            return;
        }
        for chunk in &mut self.chunks {
            if chunk.start >= position {
                break;
            }
            chunk.used = (position.min(chunk.end()) - chunk.start) as usize;
        }
        self.chunks.retain_mut(|chunk| {
            if chunk.used >= chunk.data.len() {
                return false;
            }
            if chunk.used > 0 {
                chunk.data = chunk.data.slice(chunk.used..);
                chunk.start += chunk.used as u64;
                chunk.used = 0;
            }
            true
        });
        self.released = position;
    }
}
