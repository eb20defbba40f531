use directio_types::{CompressionType, MetadataResponse};

use crate::error::{DirectIoError, Result};

/// One chunk of a file, positioned within the file by its offset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    /// 1-based position in the file's chunk sequence.
    pub index: usize,
    pub offset: u64,
    /// Plaintext length.
    pub length: u64,
    /// Signed download url.
    pub location: String,
}

impl Chunk {
    /// Exclusive end offset.
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// A file's chunk map, built once per retrieval from the metadata service response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileMetadata {
    pub file_id: String,
    pub encrypted: bool,
    /// Present iff `encrypted`.
    pub wrapped_key: Option<String>,
    pub compression: CompressionType,
    pub chunks: Vec<Chunk>,
    size: u64,
}

impl FileMetadata {
    /// Validates a metadata response and lays its chunks out contiguously from offset 0.
    pub fn from_response(file_id: &str, response: MetadataResponse) -> Result<Self> {
        let invalid = |reason: String| DirectIoError::InvalidMetadata {
            file_id: file_id.to_owned(),
            reason,
        };

        if response.chunks.is_empty() {
            return Err(DirectIoError::NoChunks(file_id.to_owned()));
        }

        let compression = response.compression().map_err(invalid)?;

        let encrypted = response.encrypt_info.data_encrypted;
        let wrapped_key = match (encrypted, response.encrypt_info.wrapped_key) {
            (true, key) if key.is_empty() => return Err(invalid("encrypted file has no wrapped key".to_owned())),
            (true, key) => Some(key),
            (false, _) => None,
        };

        let mut chunks = Vec::with_capacity(response.chunks.len());
        let mut offset = 0u64;
        for (i, info) in response.chunks.into_iter().enumerate() {
            if info.url.is_empty() {
                return Err(invalid(format!("chunk {} has no url", i + 1)));
            }
            let next = offset
                .checked_add(info.len)
                .ok_or_else(|| invalid(format!("chunk {} overflows the file size", i + 1)))?;
            chunks.push(Chunk {
                index: i + 1,
                offset,
                length: info.len,
                location: info.url,
            });
            offset = next;
        }

        Ok(Self {
            file_id: file_id.to_owned(),
            encrypted,
            wrapped_key,
            compression,
            chunks,
            size: offset,
        })
    }

    /// Total plaintext size: the end of the last chunk.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn compressed(&self) -> bool {
        self.compression.is_compressed()
    }

    /// Present iff `compressed()`.
    pub fn compression_format(&self) -> Option<CompressionType> {
        self.compressed().then_some(self.compression)
    }

    pub fn num_chunks(&self) -> usize {
        self.chunks.len()
    }
}

/// An inclusive byte window `[start, end]`, or `[start, EOF)` when `eof` is set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: Option<u64>,
    /// Read through the end of the file. Set when there is no end, or when the end lies past the file.
    pub eof: bool,
}

impl ByteRange {
    pub fn new(start: u64, end: Option<u64>) -> Result<Self> {
        if let Some(end) = end
            && end < start
        {
            return Err(DirectIoError::InvalidRange { start, end });
        }

        Ok(Self {
            start,
            end,
            eof: end.is_none(),
        })
    }

    /// The whole file.
    pub fn full() -> Self {
        Self::from_start(0)
    }

    pub fn from_start(start: u64) -> Self {
        Self {
            start,
            end: None,
            eof: true,
        }
    }

    /// Marks the range as reading through the end of the file.
    pub fn to_eof(&mut self) {
        self.eof = true;
    }

    /// The inclusive end offset that still applies, if the range stops before EOF.
    pub fn bounded_end(&self) -> Option<u64> {
        if self.eof { None } else { self.end }
    }
}

impl Default for ByteRange {
    fn default() -> Self {
        Self::full()
    }
}

#[cfg(test)]
pub(crate) fn test_response(lengths: &[u64]) -> MetadataResponse {
    MetadataResponse {
        encrypt_info: Default::default(),
        compression_type: "NONE".to_owned(),
        chunks: lengths
            .iter()
            .enumerate()
            .map(|(i, &len)| directio_types::ChunkInfo {
                url: format!("https://store.example/{i}"),
                len,
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use directio_types::EncryptInfo;

    use super::*;

    #[test]
    fn test_offsets_are_prefix_sums() {
        let lengths = [100, 7, 0, 250, 1];
        let file = FileMetadata::from_response("f", test_response(&lengths)).unwrap();

        let mut expected_offset = 0;
        for (i, chunk) in file.chunks.iter().enumerate() {
            assert_eq!(chunk.index, i + 1);
            assert_eq!(chunk.offset, expected_offset);
            assert_eq!(chunk.length, lengths[i]);
            expected_offset += lengths[i];
        }

        let last = file.chunks.last().unwrap();
        assert_eq!(file.size(), last.end());
        assert_eq!(file.size(), 358);
    }

    #[test]
    fn test_no_chunks() {
        let res = FileMetadata::from_response("empty", test_response(&[]));
        assert!(matches!(res, Err(DirectIoError::NoChunks(id)) if id == "empty"));
    }

    #[test]
    fn test_compression_and_encryption_fields() {
        let mut resp = test_response(&[10]);
        resp.compression_type = "snappy".to_owned();
        resp.encrypt_info = EncryptInfo {
            data_encrypted: true,
            wrapped_key: "a2V5".to_owned(),
        };

        let file = FileMetadata::from_response("f", resp).unwrap();
        assert!(file.compressed());
        assert_eq!(file.compression_format(), Some(CompressionType::Snappy));
        assert_eq!(file.wrapped_key.as_deref(), Some("a2V5"));

        let file = FileMetadata::from_response("f", test_response(&[10])).unwrap();
        assert!(!file.compressed());
        assert_eq!(file.compression_format(), None);
        assert_eq!(file.wrapped_key, None);
    }

    #[test]
    fn test_invalid_metadata() {
        let mut resp = test_response(&[10]);
        resp.compression_type = "LZ4".to_owned();
        assert!(matches!(FileMetadata::from_response("f", resp), Err(DirectIoError::InvalidMetadata { .. })));

        let mut resp = test_response(&[10]);
        resp.encrypt_info.data_encrypted = true;
        assert!(matches!(FileMetadata::from_response("f", resp), Err(DirectIoError::InvalidMetadata { .. })));

        let mut resp = test_response(&[10, 10]);
        resp.chunks[1].url.clear();
        assert!(matches!(FileMetadata::from_response("f", resp), Err(DirectIoError::InvalidMetadata { .. })));

        let resp = test_response(&[u64::MAX, 1]);
        assert!(matches!(FileMetadata::from_response("f", resp), Err(DirectIoError::InvalidMetadata { .. })));
    }

    #[test]
    fn test_byte_range() {
        let r = ByteRange::new(5, Some(10)).unwrap();
        assert!(!r.eof);
        assert_eq!(r.bounded_end(), Some(10));

        let r = ByteRange::new(5, Some(5)).unwrap();
        assert_eq!(r.bounded_end(), Some(5));

        let r = ByteRange::new(5, None).unwrap();
        assert!(r.eof);
        assert_eq!(r.bounded_end(), None);

        assert!(matches!(ByteRange::new(10, Some(9)), Err(DirectIoError::InvalidRange { start: 10, end: 9 })));

        let mut r = ByteRange::new(0, Some(100)).unwrap();
        r.to_eof();
        assert_eq!(r.end, Some(100));
        assert_eq!(r.bounded_end(), None);

        assert_eq!(ByteRange::default(), ByteRange::full());
    }
}
