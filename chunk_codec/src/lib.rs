pub mod compression;
pub mod crypto;
pub mod error;
pub mod test_utils;

pub use compression::{FRAMED_SNAPPY_HEADER_LEN, FRAMED_SNAPPY_MAGIC, decompress, decompress_chunk};
pub use crypto::{AES_BLOCK_SIZE, decrypt_block, unwrap_key};
pub use error::{ChunkCodecError, Result};
