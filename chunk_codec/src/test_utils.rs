//! Encoders mirroring what the storage service produces, for building fixtures in tests.

use std::io::Write;

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockCipher, BlockEncryptMut, KeyInit, KeyIvInit};
use aes::{Aes128, Aes192, Aes256};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use flate2::Compression;
use flate2::write::GzEncoder;
use rand::RngCore;

use crate::compression::FRAMED_SNAPPY_MAGIC;
use crate::crypto::WRAPPING_KEY_LEN;

pub const BLOCK_FORMAT_TAG: u8 = 0x01;

/// Default frame size used by the service's framed Snappy writer.
pub const DEFAULT_SNAPPY_FRAME_SIZE: usize = 32 * 1024;

pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    rand::rng().fill_bytes(&mut buf);
    buf
}

/// Inverse of [`crate::unwrap_key`]: quotes the base64 content key, encrypts it with AES-256-ECB
/// under the zero-padded secret and returns the base64 ciphertext.
pub fn wrap_key(content_key: &[u8], secret_b64: &str) -> String {
    wrap_key_text(&format!("\"{}\"", BASE64.encode(content_key)), secret_b64)
}

/// Encrypts arbitrary key text the way [`wrap_key`] does, for exercising the unwrap filtering.
pub fn wrap_key_text(plaintext: &str, secret_b64: &str) -> String {
    let secret = BASE64.decode(secret_b64).unwrap();
    let mut wrapping_key = [0u8; WRAPPING_KEY_LEN];
    let n = secret.len().min(WRAPPING_KEY_LEN);
    wrapping_key[..n].copy_from_slice(&secret[..n]);

    let ciphertext = ecb::Encryptor::<Aes256>::new_from_slice(&wrapping_key)
        .unwrap()
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());
    BASE64.encode(ciphertext)
}

/// Builds an encrypted block: format tag, IV, then AES-CBC ciphertext with PKCS7 padding.
pub fn encrypt_block(plaintext: &[u8], key: &[u8], iv: &[u8]) -> Vec<u8> {
    let ciphertext = match key.len() {
        16 => cbc_encrypt::<Aes128>(key, iv, plaintext),
        24 => cbc_encrypt::<Aes192>(key, iv, plaintext),
        32 => cbc_encrypt::<Aes256>(key, iv, plaintext),
        n => panic!("unsupported key length {n}"),
    };

    let mut block = Vec::with_capacity(1 + iv.len() + ciphertext.len());
    block.push(BLOCK_FORMAT_TAG);
    block.extend_from_slice(iv);
    block.extend_from_slice(&ciphertext);
    block
}

fn cbc_encrypt<C>(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Vec<u8>
where
    C: BlockCipher + BlockEncryptMut + KeyInit,
{
    cbc::Encryptor::<C>::new_from_slices(key, iv)
        .unwrap()
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext)
}

/// Writes the framed Snappy container: header, then one length-prefixed raw frame per
/// `frame_size` bytes of input.
pub fn compress_framed_snappy(data: &[u8], frame_size: usize) -> Vec<u8> {
    let mut out = FRAMED_SNAPPY_MAGIC.to_vec();
    out.extend_from_slice(&1u32.to_be_bytes());
    out.extend_from_slice(&1u32.to_be_bytes());

    let mut encoder = snap::raw::Encoder::new();
    for piece in data.chunks(frame_size.max(1)) {
        let frame = encoder.compress_vec(piece).unwrap();
        out.extend_from_slice(&(frame.len() as u32).to_be_bytes());
        out.extend_from_slice(&frame);
    }
    out
}

pub fn compress_raw_snappy(data: &[u8]) -> Vec<u8> {
    snap::raw::Encoder::new().compress_vec(data).unwrap()
}

pub fn compress_gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}
