mod block;
mod engine;
mod error;
mod fetch;
mod metadata;
mod selection;
mod stream;

pub use block::{Block, Fragment};
pub use engine::DirectIoEngine;
pub use error::{ChunkContext, DirectIoError, Result};
pub use fetch::{FetchHandles, ResolvedFile, decode_chunk, fetch, resolve};
pub use metadata::{ByteRange, Chunk, FileMetadata};
pub use selection::{select_by_blocks, select_by_range, validate_range};
pub use stream::{FragmentStream, StreamState};
