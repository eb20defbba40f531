use thiserror::Error;

#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChunkCodecError {
    #[error("Key unwrap error: {0}")]
    KeyUnwrap(String),

    #[error("Block decrypt error: {0}")]
    BlockDecrypt(String),

    #[error("Decompress error: {0}")]
    Decompress(String),
}

pub type Result<T> = std::result::Result<T, ChunkCodecError>;
