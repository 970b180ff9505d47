//! Append-only view over transport chunks.
//!
//! Chunks are kept as reference-counted [`Bytes`] and never concatenated on
//! arrival. A slice is another `ChunkBuffer` pointing into the same
//! allocations, so bytes are copied only when a caller materializes them
//! (once per header block and once per payload).

use std::fmt;

use bytes::{Bytes, BytesMut};

use crate::error::BufferError;

#[derive(Clone, Default)]
pub struct ChunkBuffer {
    chunks: Vec<Bytes>,
    /// Global offset of the first byte of each chunk (prefix sums).
    starts: Vec<usize>,
    len: usize,
}

impl ChunkBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_chunks<I, B>(chunks: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        let mut buf = Self::new();
        for chunk in chunks {
            buf.append(chunk);
        }
        buf
    }

    /// Extend the logical sequence. Slices taken earlier are unaffected.
    pub fn append(&mut self, chunk: impl Into<Bytes>) {
        let chunk = chunk.into();
        if chunk.is_empty() {
            return;
        }
        self.starts.push(self.len);
        self.len += chunk.len();
        self.chunks.push(chunk);
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Chunk index and in-chunk offset for a global offset `< len`.
    fn locate(&self, index: usize) -> (usize, usize) {
        let chunk = self.starts.partition_point(|&start| start <= index) - 1;
        (chunk, index - self.starts[chunk])
    }

    pub fn byte_at(&self, index: usize) -> Result<u8, BufferError> {
        if index >= self.len {
            return Err(BufferError::OutOfRange {
                index,
                len: self.len,
            });
        }
        let (chunk, offset) = self.locate(index);
        Ok(self.chunks[chunk][offset])
    }

    /// First global offset `>= from` holding `byte`, scanning across chunk
    /// boundaries.
    pub fn index_of(&self, byte: u8, from: usize) -> Option<usize> {
        if from >= self.len {
            return None;
        }
        let (first, mut offset) = self.locate(from);
        for (i, chunk) in self.chunks.iter().enumerate().skip(first) {
            if let Some(pos) = chunk[offset..].iter().position(|&b| b == byte) {
                return Some(self.starts[i] + offset + pos);
            }
            offset = 0;
        }
        None
    }

    /// View over `[start, end)` sharing the underlying chunk storage.
    pub fn slice(&self, start: usize, end: usize) -> Result<ChunkBuffer, BufferError> {
        if start > end || end > self.len {
            return Err(BufferError::InvalidRange {
                start,
                end,
                len: self.len,
            });
        }
        Ok(self.view(start, end))
    }

    /// Split into `[0, mid)` and `[mid, len)`. `mid` is clamped to `len`.
    pub fn split_at(&self, mid: usize) -> (ChunkBuffer, ChunkBuffer) {
        let mid = mid.min(self.len);
        (self.view(0, mid), self.view(mid, self.len))
    }

    /// Caller guarantees `start <= end <= len`.
    fn view(&self, start: usize, end: usize) -> ChunkBuffer {
        let mut out = ChunkBuffer::new();
        if start == end {
            return out;
        }

        let (first, mut offset) = self.locate(start);
        let mut remaining = end - start;
        for chunk in &self.chunks[first..] {
            let take = (chunk.len() - offset).min(remaining);
            out.append(chunk.slice(offset..offset + take));
            remaining -= take;
            if remaining == 0 {
                break;
            }
            offset = 0;
        }
        out
    }

    /// Materialize into one contiguous buffer.
    pub fn to_bytes(&self) -> Bytes {
        match self.chunks.len() {
            0 => Bytes::new(),
            1 => self.chunks[0].clone(),
            _ => {
                let mut out = BytesMut::with_capacity(self.len);
                for chunk in &self.chunks {
                    out.extend_from_slice(chunk);
                }
                out.freeze()
            }
        }
    }

    pub fn to_utf8(&self) -> Result<String, std::string::FromUtf8Error> {
        String::from_utf8(self.to_bytes().to_vec())
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.to_bytes()).into_owned()
    }
}

impl fmt::Debug for ChunkBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkBuffer")
            .field("len", &self.len)
            .field("chunks", &self.chunks.len())
            .finish()
    }
}

// ── Unit tests ──────────────────────────────────────────────────────
