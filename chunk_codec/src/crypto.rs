use aes::cipher::block_padding::NoPadding;
use aes::cipher::{BlockCipher, BlockDecryptMut, KeyInit, KeyIvInit};
use aes::{Aes128, Aes192, Aes256};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use tracing::trace;

use crate::error::{ChunkCodecError, Result};

pub const AES_BLOCK_SIZE: usize = 16;

/// Length of the key-wrapping key derived from the user secret.
pub const WRAPPING_KEY_LEN: usize = 32;

/// Encrypted blocks start with a single format tag byte, followed by the IV.
pub const BLOCK_TAG_LEN: usize = 1;
pub const BLOCK_IV_LEN: usize = 16;
pub const BLOCK_HEADER_LEN: usize = BLOCK_TAG_LEN + BLOCK_IV_LEN;

/// Recovers the per-file content key from the metadata's wrapped key.
///
/// The secret is base64-decoded and zero-padded (or truncated) to 32 bytes to form an
/// AES-256-ECB key. The decrypted plaintext is reduced to its printable characters; what
/// remains is a quoted base64 string, so the first and last characters are dropped and the
/// rest decoded into the content key.
pub fn unwrap_key(wrapped_key_b64: impl AsRef<[u8]>, secret_b64: impl AsRef<[u8]>) -> Result<Vec<u8>> {
    let secret = BASE64
        .decode(secret_b64.as_ref())
        .map_err(|e| ChunkCodecError::KeyUnwrap(format!("secret is not valid base64: {e}")))?;

    let mut wrapping_key = [0u8; WRAPPING_KEY_LEN];
    let n = secret.len().min(WRAPPING_KEY_LEN);
    wrapping_key[..n].copy_from_slice(&secret[..n]);

    let ciphertext = BASE64
        .decode(wrapped_key_b64.as_ref())
        .map_err(|e| ChunkCodecError::KeyUnwrap(format!("wrapped key is not valid base64: {e}")))?;

    if ciphertext.is_empty() || ciphertext.len() % AES_BLOCK_SIZE != 0 {
        return Err(ChunkCodecError::KeyUnwrap(format!(
            "wrapped key length {} is not a positive multiple of {AES_BLOCK_SIZE}",
            ciphertext.len()
        )));
    }

    let plaintext = ecb::Decryptor::<Aes256>::new_from_slice(&wrapping_key)
        .map_err(|e| ChunkCodecError::KeyUnwrap(e.to_string()))?
        .decrypt_padded_vec_mut::<NoPadding>(&ciphertext)
        .map_err(|e| ChunkCodecError::KeyUnwrap(e.to_string()))?;

    let text = String::from_utf8(plaintext)
        .map_err(|_| ChunkCodecError::KeyUnwrap("unwrapped key is not valid utf-8".to_owned()))?;

    let printable: Vec<char> = text.chars().filter(|c| is_printable(*c)).collect();
    if printable.len() < 2 {
        return Err(ChunkCodecError::KeyUnwrap("unwrapped key is too short".to_owned()));
    }
    let inner: String = printable[1..printable.len() - 1].iter().collect();

    let key = BASE64
        .decode(inner.as_bytes())
        .map_err(|e| ChunkCodecError::KeyUnwrap(format!("unwrapped key is not valid base64: {e}")))?;

    if key.is_empty() {
        return Err(ChunkCodecError::KeyUnwrap("unwrapped key is empty".to_owned()));
    }

    trace!(key_len = key.len(), "Unwrapped content key");
    Ok(key)
}

/// Decrypts one downloaded block with the content key.
///
/// Byte 0 is a format tag and is ignored; bytes 1..17 are the IV; the remainder is AES-CBC
/// ciphertext. No padding is removed from the output.
pub fn decrypt_block(block: &[u8], key: &[u8]) -> Result<Vec<u8>> {
    if block.len() < BLOCK_HEADER_LEN {
        return Err(ChunkCodecError::BlockDecrypt(format!(
            "block of {} bytes is shorter than the {BLOCK_HEADER_LEN} byte header",
            block.len()
        )));
    }

    let iv = &block[BLOCK_TAG_LEN..BLOCK_HEADER_LEN];
    let ciphertext = &block[BLOCK_HEADER_LEN..];

    if ciphertext.len() % AES_BLOCK_SIZE != 0 {
        return Err(ChunkCodecError::BlockDecrypt(format!(
            "ciphertext length {} is not a multiple of {AES_BLOCK_SIZE}",
            ciphertext.len()
        )));
    }

    match key.len() {
        16 => cbc_decrypt::<Aes128>(key, iv, ciphertext),
        24 => cbc_decrypt::<Aes192>(key, iv, ciphertext),
        32 => cbc_decrypt::<Aes256>(key, iv, ciphertext),
        n => Err(ChunkCodecError::BlockDecrypt(format!("unsupported content key length {n}"))),
    }
}

fn cbc_decrypt<C>(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>>
where
    C: BlockCipher + BlockDecryptMut + KeyInit,
{
    cbc::Decryptor::<C>::new_from_slices(key, iv)
        .map_err(|e| ChunkCodecError::BlockDecrypt(e.to_string()))?
        .decrypt_padded_vec_mut::<NoPadding>(ciphertext)
        .map_err(|e| ChunkCodecError::BlockDecrypt(e.to_string()))
}

// Characters that survive the key filter: ASCII graphic characters and the space.
fn is_printable(c: char) -> bool {
    c == ' ' || c.is_ascii_graphic()
}
