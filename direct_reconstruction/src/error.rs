use std::fmt;
use std::sync::Arc;

use chunk_codec::ChunkCodecError;
use directio_client::DirectIoClientError;
use thiserror::Error;

use crate::metadata::{Chunk, FileMetadata};

/// Identifies the chunk a per-block error belongs to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkContext {
    pub file_id: String,
    /// 1-based chunk index.
    pub index: usize,
    pub offset: u64,
    pub length: u64,
}

impl ChunkContext {
    pub fn new(file: &FileMetadata, chunk: &Chunk) -> Self {
        Self {
            file_id: file.file_id.clone(),
            index: chunk.index,
            offset: chunk.offset,
            length: chunk.length,
        }
    }
}

impl fmt::Display for ChunkContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "file {} chunk {} (offset {}, length {})", self.file_id, self.index, self.offset, self.length)
    }
}

/// Errors that can occur while retrieving a file.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum DirectIoError {
    #[error("Invalid byte range: end {end} is before start {start}")]
    InvalidRange { start: u64, end: u64 },

    #[error("Byte range start {start} is beyond the end of file {file_id} ({size} bytes)")]
    RangeStartBeyondEof { file_id: String, start: u64, size: u64 },

    #[error("Block number {number} out of range for file {file_id} with {num_chunks} chunks")]
    BlockNumberOutOfRange {
        file_id: String,
        number: usize,
        num_chunks: usize,
    },

    #[error("Failed to unwrap content key for file {file_id}: {source}")]
    KeyUnwrap {
        file_id: String,
        #[source]
        source: ChunkCodecError,
    },

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Unauthorized access to file: {0}")]
    Unauthorized(String),

    #[error("File not eligible for direct retrieval: {0}")]
    UnprocessableContent(String),

    #[error("No chunks found for file {0}")]
    NoChunks(String),

    #[error("Invalid metadata for file {file_id}: {reason}")]
    InvalidMetadata { file_id: String, reason: String },

    #[error("Download failed for {context}: {source}")]
    Download {
        context: ChunkContext,
        #[source]
        source: Arc<DirectIoClientError>,
    },

    #[error("Decryption failed for {context}: {source}")]
    BlockDecrypt {
        context: ChunkContext,
        #[source]
        source: ChunkCodecError,
    },

    #[error("Decompression failed for {context}: {source}")]
    Decompress {
        context: ChunkContext,
        #[source]
        source: ChunkCodecError,
    },

    #[error("Block validation failed for {context}: got {actual_length} bytes")]
    BlockValidation { context: ChunkContext, actual_length: u64 },

    #[error("Stream failed at offset {current_offset}: {source}")]
    Stream {
        current_offset: u64,
        #[source]
        source: Box<DirectIoError>,
    },

    #[error("Engine has been shut down")]
    EngineShutdown,

    #[error("Task for {context} did not complete: {message}")]
    TaskJoin { context: ChunkContext, message: String },

    #[error("Client Error: {0}")]
    Client(Arc<DirectIoClientError>),
}

pub type Result<T> = std::result::Result<T, DirectIoError>;

impl DirectIoError {
    /// Maps a metadata lookup failure onto the typed metadata errors.
    pub(crate) fn from_metadata_error(file_id: &str, err: DirectIoClientError) -> Self {
        match err {
            DirectIoClientError::NotFound(_) => DirectIoError::NotFound(file_id.to_owned()),
            DirectIoClientError::Unauthorized(_) => DirectIoError::Unauthorized(file_id.to_owned()),
            DirectIoClientError::UnprocessableContent(_) => DirectIoError::UnprocessableContent(file_id.to_owned()),
            e => DirectIoError::Client(Arc::new(e)),
        }
    }

    /// The chunk this error is attached to, if any. Stream errors report the chunk of the wrapped error.
    pub fn chunk_context(&self) -> Option<&ChunkContext> {
        match self {
            DirectIoError::Download { context, .. }
            | DirectIoError::BlockDecrypt { context, .. }
            | DirectIoError::Decompress { context, .. }
            | DirectIoError::BlockValidation { context, .. }
            | DirectIoError::TaskJoin { context, .. } => Some(context),
            DirectIoError::Stream { source, .. } => source.chunk_context(),
            _ => None,
        }
    }

    /// True when the failure was a connection or timeout error that outlasted the retry policy.
    pub fn is_connection_error(&self) -> bool {
        match self {
            DirectIoError::Download { source, .. } | DirectIoError::Client(source) => source.is_connection_error(),
            DirectIoError::Stream { source, .. } => source.is_connection_error(),
            _ => false,
        }
    }

    /// Strips a `Stream` wrapper.
    pub fn root(&self) -> &DirectIoError {
        match self {
            DirectIoError::Stream { source, .. } => source.root(),
            e => e,
        }
    }
}

impl From<DirectIoClientError> for DirectIoError {
    fn from(err: DirectIoClientError) -> Self {
        DirectIoError::Client(Arc::new(err))
    }
}
