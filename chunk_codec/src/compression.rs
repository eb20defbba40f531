use std::io::Read;

use directio_types::CompressionType;
use flate2::read::GzDecoder;
use tracing::trace;

use crate::error::{ChunkCodecError, Result};

/// Leading bytes of the framed Snappy container: `\x82SNAPPY\0`.
pub const FRAMED_SNAPPY_MAGIC: [u8; 8] = [0x82, 0x53, 0x4E, 0x41, 0x50, 0x50, 0x59, 0x00];

/// Magic, then a 4-byte version and a 4-byte compatible version, neither of which is checked.
pub const FRAMED_SNAPPY_HEADER_LEN: usize = 16;

const FRAME_LENGTH_PREFIX_LEN: usize = 4;

/// Decompresses a chunk payload according to the file's compression type.
pub fn decompress_chunk(compression: CompressionType, data: &[u8]) -> Result<Vec<u8>> {
    match compression {
        CompressionType::Snappy => decompress(data),
        CompressionType::Gzip => decompress_gzip(data),
        CompressionType::None => Ok(data.to_vec()),
    }
}

/// Decompresses a Snappy payload, framed or bare.
///
/// Payloads carrying [`FRAMED_SNAPPY_MAGIC`] are parsed as a sequence of length-prefixed
/// raw Snappy frames following the header. Parsing stops at the first frame that would run past
/// the end of the buffer, so trailing bytes (e.g. cipher padding) are ignored. Anything else is
/// decoded as one raw Snappy block.
pub fn decompress(block: &[u8]) -> Result<Vec<u8>> {
    if block.starts_with(&FRAMED_SNAPPY_MAGIC) {
        decompress_framed(block)
    } else {
        decompress_raw(block)
    }
}

fn decompress_framed(block: &[u8]) -> Result<Vec<u8>> {
    if block.len() < FRAMED_SNAPPY_HEADER_LEN {
        return Err(ChunkCodecError::Decompress(format!(
            "framed snappy header truncated at {} bytes",
            block.len()
        )));
    }

    let mut out = Vec::new();
    let mut decoder = snap::raw::Decoder::new();
    let mut pos = FRAMED_SNAPPY_HEADER_LEN;
    let mut n_frames = 0usize;

    while pos + FRAME_LENGTH_PREFIX_LEN <= block.len() {
        let mut prefix = [0u8; FRAME_LENGTH_PREFIX_LEN];
        prefix.copy_from_slice(&block[pos..pos + FRAME_LENGTH_PREFIX_LEN]);
        let frame_len = u32::from_be_bytes(prefix) as usize;
        pos += FRAME_LENGTH_PREFIX_LEN;

        let Some(frame_end) = pos.checked_add(frame_len).filter(|end| *end <= block.len()) else {
            break;
        };

        if frame_len > 0 {
            let frame = decoder
                .decompress_vec(&block[pos..frame_end])
                .map_err(|e| ChunkCodecError::Decompress(format!("snappy frame {n_frames}: {e}")))?;
            out.extend_from_slice(&frame);
        }

        pos = frame_end;
        n_frames += 1;
    }

    trace!(n_frames, decompressed_len = out.len(), "Decompressed framed snappy block");
    Ok(out)
}

fn decompress_raw(block: &[u8]) -> Result<Vec<u8>> {
    snap::raw::Decoder::new()
        .decompress_vec(block)
        .map_err(|e| ChunkCodecError::Decompress(format!("snappy: {e}")))
}

/// Decodes a single gzip member; bytes after it are ignored.
pub fn decompress_gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    GzDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| ChunkCodecError::Decompress(format!("gzip: {e}")))?;
    Ok(out)
}
