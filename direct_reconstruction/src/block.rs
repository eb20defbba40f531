use bytes::Bytes;

use crate::metadata::ByteRange;

/// The decrypted, decompressed and length-checked plaintext of one chunk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub file_id: String,
    /// Mirrors the 1-based chunk index.
    pub number: usize,
    pub offset: u64,
    pub data: Bytes,
}

/// A block trimmed to a requested byte range; `offset` is the file offset of `data[0]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fragment {
    pub file_id: String,
    pub number: usize,
    pub offset: u64,
    pub data: Bytes,
}

impl Block {
    pub fn length(&self) -> u64 {
        self.data.len() as u64
    }

    /// Exclusive end offset.
    pub fn end(&self) -> u64 {
        self.offset + self.length()
    }

    /// Trims the block to `range`. The data is sliced, not copied.
    pub fn into_fragment(self, range: &ByteRange) -> Fragment {
        let length = self.data.len();

        let local_start = if range.start > self.offset && range.start < self.end() {
            (range.start - self.offset) as usize
        } else {
            0
        };

        let local_end = match range.bounded_end() {
            Some(end) if end >= self.offset && end < self.end() => (end - self.offset + 1) as usize,
            _ => length,
        };

        Fragment {
            file_id: self.file_id,
            number: self.number,
            offset: self.offset + local_start as u64,
            data: self.data.slice(local_start..local_end.max(local_start)),
        }
    }
}

impl Fragment {
    pub fn length(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn end(&self) -> u64 {
        self.offset + self.length()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
