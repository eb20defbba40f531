//! Wire types exchanged with the metadata service.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The response body of `GET /{file_id}` on the metadata service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataResponse {
    #[serde(default)]
    pub encrypt_info: EncryptInfo,
    /// One of `SNAPPY`, `GZIP`, `NONE`; kept as received and validated by [`MetadataResponse::compression`].
    #[serde(default = "default_compression_type")]
    pub compression_type: String,
    #[serde(default)]
    pub chunks: Vec<ChunkInfo>,
}

fn default_compression_type() -> String {
    CompressionType::None.to_string()
}

impl Default for MetadataResponse {
    fn default() -> Self {
        Self {
            encrypt_info: EncryptInfo::default(),
            compression_type: default_compression_type(),
            chunks: Vec::new(),
        }
    }
}

impl MetadataResponse {
    pub fn compression(&self) -> Result<CompressionType, String> {
        self.compression_type.parse()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EncryptInfo {
    #[serde(default)]
    pub data_encrypted: bool,
    /// Base64 of the AES-ECB wrapped content key; empty when the file is not encrypted.
    #[serde(default)]
    pub wrapped_key: String,
}

/// One entry of the chunk list, in file order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkInfo {
    /// Pre-signed, time-limited download URL.
    pub url: String,
    /// Plaintext length of the chunk.
    pub len: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionType {
    Snappy,
    Gzip,
    #[default]
    None,
}

impl CompressionType {
    pub fn is_compressed(&self) -> bool {
        !matches!(self, CompressionType::None)
    }
}

impl fmt::Display for CompressionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompressionType::Snappy => "SNAPPY",
            CompressionType::Gzip => "GZIP",
            CompressionType::None => "NONE",
        };
        f.write_str(s)
    }
}

impl FromStr for CompressionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SNAPPY" => Ok(CompressionType::Snappy),
            "GZIP" => Ok(CompressionType::Gzip),
            "NONE" | "" => Ok(CompressionType::None),
            other => Err(format!("unknown compression type {other:?}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_metadata_response() {
        let body = r#"{
            "encrypt_info": {"data_encrypted": true, "wrapped_key": "abc="},
            "compression_type": "SNAPPY",
            "chunks": [{"url": "http://a/1", "len": 10}, {"url": "http://a/2", "len": 4}]
        }"#;

        let response: MetadataResponse = serde_json::from_str(body).unwrap();
        assert!(response.encrypt_info.data_encrypted);
        assert_eq!(response.encrypt_info.wrapped_key, "abc=");
        assert_eq!(response.compression(), Ok(CompressionType::Snappy));
        assert_eq!(response.chunks.len(), 2);
        assert_eq!(response.chunks[1].len, 4);
    }

    #[test]
    fn test_missing_fields_default() {
        let response: MetadataResponse = serde_json::from_str(r#"{"chunks": []}"#).unwrap();
        assert!(!response.encrypt_info.data_encrypted);
        assert_eq!(response.compression(), Ok(CompressionType::None));
        assert!(response.chunks.is_empty());
    }

    #[test]
    fn test_unknown_compression_rejected() {
        let response: MetadataResponse =
            serde_json::from_str(r#"{"compression_type": "LZ4", "chunks": []}"#).unwrap();
        assert!(response.compression().is_err());
        assert!("lz4".parse::<CompressionType>().is_err());
        assert_eq!("gzip".parse::<CompressionType>(), Ok(CompressionType::Gzip));
    }
}
