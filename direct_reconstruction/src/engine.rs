use std::sync::{Arc, RwLock};

use bytes::{Bytes, BytesMut};
use directio_client::{Client, RemoteClient};
use directio_config::ReconstructionConfig;
use futures::StreamExt;
use tracing::{info, instrument};
use utils::Credentials;

use crate::block::Block;
use crate::error::{DirectIoError, Result};
use crate::fetch::{fetch, resolve};
use crate::metadata::ByteRange;
use crate::selection::select_by_blocks;
use crate::stream::FragmentStream;

/// Retrieves files directly from object storage.
///
/// Every call resolves the file afresh, since chunk urls expire. The engine holds no other state
/// between calls.
///
/// # Example
///
/// ```ignore
/// let engine = DirectIoEngine::new("https://metadata.example", Credentials::key_pair(key_id, secret))?;
/// let mut fragments = engine.stream("file-id", Some(ByteRange::new(0, Some(1023))?))?;
/// while let Some(fragment) = fragments.next().await {
///     let fragment = fragment?;
///     output.write_all_at(&fragment.data, fragment.offset)?;
/// }
/// engine.shutdown();
/// ```
pub struct DirectIoEngine {
    client: RwLock<Option<Arc<dyn Client>>>,
    credentials: Credentials,
    config: Arc<ReconstructionConfig>,
}

impl DirectIoEngine {
    /// An engine talking HTTP to the metadata service at `endpoint`, configured from the process-wide config.
    pub fn new(endpoint: &str, credentials: Credentials) -> Result<Self> {
        let client = RemoteClient::new(endpoint, &credentials)?;
        Ok(Self::from_client(client, credentials))
    }

    pub fn from_client(client: Arc<dyn Client>, credentials: Credentials) -> Self {
        Self {
            client: RwLock::new(Some(client)),
            credentials,
            config: Arc::new(directio_config::directio_config().reconstruction.clone()),
        }
    }

    pub fn with_config(mut self, config: impl AsRef<ReconstructionConfig>) -> Self {
        self.config = Arc::new(config.as_ref().clone());
        self
    }

    fn client(&self) -> Result<Arc<dyn Client>> {
        self.client
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(DirectIoError::EngineShutdown)
    }

    /// Retrieves whole blocks by 1-based number, or every block when `block_numbers` is `None` or empty.
    ///
    /// Blocks come back in the order requested. The first failure in that order fails the call and
    /// cancels the remaining downloads.
    #[instrument(skip_all, name = "DirectIoEngine::blocks", fields(file.id = file_id))]
    pub async fn blocks(&self, file_id: &str, block_numbers: Option<&[usize]>) -> Result<Vec<Block>> {
        let client = self.client()?;
        let resolved = resolve(client.as_ref(), file_id, &self.credentials).await?;
        let chunks = select_by_blocks(&resolved.metadata, block_numbers)?;

        info!(file_id, num_blocks = chunks.len(), "Starting block retrieval");

        let blocks = fetch(client, &resolved, chunks, self.config.block_concurrency_limit)
            .join_all()
            .await?;

        info!(
            file_id,
            num_blocks = blocks.len(),
            total_bytes = blocks.iter().map(Block::length).sum::<u64>(),
            "Completed block retrieval"
        );

        Ok(blocks)
    }

    /// A lazy stream of fragments covering `byte_range` (the whole file when `None`).
    ///
    /// Nothing is requested until the stream is first polled; see [`FragmentStream`].
    pub fn stream(&self, file_id: &str, byte_range: Option<ByteRange>) -> Result<FragmentStream> {
        let client = self.client()?;
        Ok(FragmentStream::new(
            client,
            self.credentials.clone(),
            file_id,
            byte_range.unwrap_or_default(),
            self.config.stream_concurrency_limit,
        ))
    }

    /// Streams `byte_range` into a single buffer.
    #[instrument(skip_all, name = "DirectIoEngine::read_range", fields(file.id = file_id))]
    pub async fn read_range(&self, file_id: &str, byte_range: Option<ByteRange>) -> Result<Bytes> {
        let mut stream = self.stream(file_id, byte_range)?;
        let mut buf = BytesMut::new();
        while let Some(fragment) = stream.next().await {
            buf.extend_from_slice(&fragment?.data);
        }
        Ok(buf.freeze())
    }

    /// Resolves the file and returns its plaintext size.
    pub async fn file_size(&self, file_id: &str) -> Result<u64> {
        let client = self.client()?;
        let resolved = resolve(client.as_ref(), file_id, &self.credentials).await?;
        Ok(resolved.metadata.size())
    }

    /// Releases the underlying client. Later calls fail with [`DirectIoError::EngineShutdown`]; calling
    /// this again does nothing.
    pub fn shutdown(&self) {
        if self.client.write().unwrap_or_else(|e| e.into_inner()).take().is_some() {
            info!("DirectIO engine shut down");
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.client.read().unwrap_or_else(|e| e.into_inner()).is_none()
    }
}
