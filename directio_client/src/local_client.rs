use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chunk_codec::test_utils::{
    DEFAULT_SNAPPY_FRAME_SIZE, compress_framed_snappy, compress_gzip, compress_raw_snappy, encrypt_block, random_bytes,
    wrap_key,
};
use chunk_codec::crypto::BLOCK_IV_LEN;
use directio_types::{ChunkInfo, CompressionType, EncryptInfo, MetadataResponse};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::Client;
use crate::error::{DirectIoClientError, Result};

/// Scheme of the chunk locations handed out by [`LocalClient`].
pub const LOCAL_CHUNK_SCHEME: &str = "local://";

pub fn local_chunk_location(file_id: &str, index: usize) -> String {
    format!("{LOCAL_CHUNK_SCHEME}{file_id}/{index}")
}

fn parse_local_chunk_location(location: &str) -> Result<(&str, usize)> {
    let invalid = || DirectIoClientError::InvalidArguments(format!("not a local chunk location: {location}"));
    let rest = location.strip_prefix(LOCAL_CHUNK_SCHEME).ok_or_else(invalid)?;
    let (file_id, index) = rest.rsplit_once('/').ok_or_else(invalid)?;
    let index = index.parse::<usize>().map_err(|_| invalid())?;
    Ok((file_id, index))
}

/// How [`LocalClient::upload_file`] encodes the chunks it stores.
#[derive(Clone, Debug)]
pub struct StoredFileOptions {
    pub compression: CompressionType,
    /// Write Snappy chunks in the multi-frame container rather than as one bare block.
    pub framed_snappy: bool,
    pub snappy_frame_size: usize,
    /// When set, chunks are encrypted under a fresh content key wrapped with this base64 secret.
    pub encryption_secret: Option<String>,
    pub content_key_len: usize,
}

impl Default for StoredFileOptions {
    fn default() -> Self {
        Self {
            compression: CompressionType::None,
            framed_snappy: true,
            snappy_frame_size: DEFAULT_SNAPPY_FRAME_SIZE,
            encryption_secret: None,
            content_key_len: 32,
        }
    }
}

impl StoredFileOptions {
    pub fn snappy() -> Self {
        Self {
            compression: CompressionType::Snappy,
            ..Default::default()
        }
    }

    pub fn with_encryption(mut self, secret_b64: impl Into<String>) -> Self {
        self.encryption_secret = Some(secret_b64.into());
        self
    }
}

/// Metadata responses the service answers with instead of a chunk map.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetadataFailure {
    NotFound,
    Unauthorized,
    UnprocessableContent,
}

#[derive(Clone, Debug, Default)]
struct ChunkBehavior {
    delay: Option<Duration>,
    fail: bool,
}

struct StoredFile {
    metadata: MetadataResponse,
    payloads: Vec<Bytes>,
    failure: Option<MetadataFailure>,
    chunk_behavior: HashMap<usize, ChunkBehavior>,
}

/// An in-memory metadata service and object store.
///
/// Chunk locations take the form `local://{file_id}/{index}` and are served by [`Client::get_chunk`]. Counters on
/// the client record how many metadata and chunk requests were made and how many chunk downloads were in flight
/// at once.
#[derive(Default)]
pub struct LocalClient {
    files: RwLock<HashMap<String, StoredFile>>,
    required_token: Option<String>,
    metadata_requests: AtomicUsize,
    chunk_requests: AtomicUsize,
    chunk_downloads_completed: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl LocalClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A client whose HTTP front end ([`crate::local_server::LocalServer`]) only accepts this bearer token.
    pub fn with_required_token(token: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            required_token: Some(token.into()),
            ..Default::default()
        })
    }

    pub fn required_token(&self) -> Option<&str> {
        self.required_token.as_deref()
    }

    /// Stores a file exactly as given. Chunk urls in `metadata` are replaced with local locations; `payloads` are
    /// served verbatim, one per chunk.
    pub async fn put_file(&self, file_id: &str, mut metadata: MetadataResponse, payloads: Vec<Bytes>) -> Result<()> {
        if metadata.chunks.len() != payloads.len() {
            return Err(DirectIoClientError::InvalidArguments(format!(
                "{} chunks declared but {} payloads given",
                metadata.chunks.len(),
                payloads.len()
            )));
        }

        for (i, chunk) in metadata.chunks.iter_mut().enumerate() {
            chunk.url = local_chunk_location(file_id, i);
        }

        debug!(file_id, num_chunks = payloads.len(), "LocalClient storing file");

        self.files.write().await.insert(
            file_id.to_owned(),
            StoredFile {
                metadata,
                payloads,
                failure: None,
                chunk_behavior: HashMap::new(),
            },
        );
        Ok(())
    }

    /// Splits `data` into chunks of the given lengths, encodes each per `options` and stores the file.
    ///
    /// Returns the content key when the file is encrypted.
    pub async fn upload_file(
        &self,
        file_id: &str,
        data: &[u8],
        chunk_lengths: &[usize],
        options: &StoredFileOptions,
    ) -> Result<Option<Vec<u8>>> {
        if chunk_lengths.iter().sum::<usize>() != data.len() {
            return Err(DirectIoClientError::InvalidArguments(format!(
                "chunk lengths do not add up to the data length {}",
                data.len()
            )));
        }

        if options.encryption_secret.is_some() && ![16, 24, 32].contains(&options.content_key_len) {
            return Err(DirectIoClientError::InvalidArguments(format!(
                "unsupported content key length {}",
                options.content_key_len
            )));
        }

        let content_key = options
            .encryption_secret
            .as_ref()
            .map(|_| random_bytes(options.content_key_len));

        let wrapped_key = match (&options.encryption_secret, &content_key) {
            (Some(secret), Some(key)) => wrap_key(key, secret),
            _ => String::new(),
        };

        let mut chunks = Vec::with_capacity(chunk_lengths.len());
        let mut payloads = Vec::with_capacity(chunk_lengths.len());
        let mut offset = 0;

        for &len in chunk_lengths {
            let plaintext = &data[offset..offset + len];
            offset += len;

            let compressed = match options.compression {
                CompressionType::Snappy if options.framed_snappy => {
                    compress_framed_snappy(plaintext, options.snappy_frame_size)
                },
                CompressionType::Snappy => compress_raw_snappy(plaintext),
                CompressionType::Gzip => compress_gzip(plaintext),
                CompressionType::None => plaintext.to_vec(),
            };

            let payload = match &content_key {
                Some(key) => encrypt_block(&compressed, key, &random_bytes(BLOCK_IV_LEN)),
                None => compressed,
            };

            chunks.push(ChunkInfo {
                url: String::new(),
                len: len as u64,
            });
            payloads.push(Bytes::from(payload));
        }

        let metadata = MetadataResponse {
            encrypt_info: EncryptInfo {
                data_encrypted: content_key.is_some(),
                wrapped_key,
            },
            compression_type: options.compression.to_string(),
            chunks,
        };

        self.put_file(file_id, metadata, payloads).await?;
        Ok(content_key)
    }

    /// Makes metadata requests for `file_id` fail as the service would.
    pub async fn set_metadata_failure(&self, file_id: &str, failure: Option<MetadataFailure>) -> Result<()> {
        let mut files = self.files.write().await;
        let file = files
            .get_mut(file_id)
            .ok_or_else(|| DirectIoClientError::NotFound(file_id.to_owned()))?;
        file.failure = failure;
        Ok(())
    }

    /// Delays the download of one chunk (0-based).
    pub async fn set_chunk_delay(&self, file_id: &str, index: usize, delay: Duration) -> Result<()> {
        self.update_chunk_behavior(file_id, index, |b| b.delay = Some(delay)).await
    }

    /// Makes the download of one chunk (0-based) fail.
    pub async fn set_chunk_failure(&self, file_id: &str, index: usize) -> Result<()> {
        self.update_chunk_behavior(file_id, index, |b| b.fail = true).await
    }

    async fn update_chunk_behavior(&self, file_id: &str, index: usize, f: impl FnOnce(&mut ChunkBehavior)) -> Result<()> {
        let mut files = self.files.write().await;
        let file = files
            .get_mut(file_id)
            .ok_or_else(|| DirectIoClientError::NotFound(file_id.to_owned()))?;
        if index >= file.payloads.len() {
            return Err(DirectIoClientError::InvalidArguments(format!("chunk {index} out of range")));
        }
        f(file.chunk_behavior.entry(index).or_default());
        Ok(())
    }

    /// Serves one chunk payload by 0-based index.
    pub async fn get_chunk_by_index(&self, file_id: &str, index: usize) -> Result<Bytes> {
        self.chunk_requests.fetch_add(1, Ordering::Relaxed);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        let _guard = InFlightGuard(&self.in_flight);

        let (payload, behavior) = {
            let files = self.files.read().await;
            let file = files
                .get(file_id)
                .ok_or_else(|| DirectIoClientError::NotFound(file_id.to_owned()))?;
            let payload = file
                .payloads
                .get(index)
                .cloned()
                .ok_or_else(|| DirectIoClientError::InvalidArguments(format!("chunk {index} of {file_id} not found")))?;
            (payload, file.chunk_behavior.get(&index).cloned().unwrap_or_default())
        };

        if let Some(delay) = behavior.delay {
            tokio::time::sleep(delay).await;
        }

        if behavior.fail {
            info!(file_id, index, "LocalClient failing chunk download");
            return Err(DirectIoClientError::Other(format!("download of chunk {index} of {file_id} failed")));
        }

        self.chunk_downloads_completed.fetch_add(1, Ordering::Relaxed);
        Ok(payload)
    }

    pub fn metadata_request_count(&self) -> usize {
        self.metadata_requests.load(Ordering::Relaxed)
    }

    pub fn chunk_request_count(&self) -> usize {
        self.chunk_requests.load(Ordering::Relaxed)
    }

    pub fn chunk_downloads_completed(&self) -> usize {
        self.chunk_downloads_completed.load(Ordering::Relaxed)
    }

    /// Highest number of chunk downloads observed in flight at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Client for LocalClient {
    async fn get_file_metadata(&self, file_id: &str) -> Result<MetadataResponse> {
        self.metadata_requests.fetch_add(1, Ordering::Relaxed);

        let files = self.files.read().await;
        let file = files
            .get(file_id)
            .ok_or_else(|| DirectIoClientError::NotFound(file_id.to_owned()))?;

        match file.failure {
            Some(MetadataFailure::NotFound) => Err(DirectIoClientError::NotFound(file_id.to_owned())),
            Some(MetadataFailure::Unauthorized) => Err(DirectIoClientError::Unauthorized(file_id.to_owned())),
            Some(MetadataFailure::UnprocessableContent) => {
                Err(DirectIoClientError::UnprocessableContent(file_id.to_owned()))
            },
            None => Ok(file.metadata.clone()),
        }
    }

    async fn get_chunk(&self, location: &str) -> Result<Bytes> {
        let (file_id, index) = parse_local_chunk_location(location)?;
        self.get_chunk_by_index(file_id, index).await
    }
}
