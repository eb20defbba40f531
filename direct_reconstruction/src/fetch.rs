//! Metadata resolution and the per-chunk download pipeline.
//!
//! [`fetch`] spawns one task per chunk: download (holding a concurrency permit), then decrypt, decompress
//! and length-check. Tasks finish in any order; [`FetchHandles`] hands their results back in chunk order
//! and aborts whatever is still outstanding when it is dropped.

use std::collections::VecDeque;
use std::future::poll_fn;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use chunk_codec::{AES_BLOCK_SIZE, ChunkCodecError, decompress_chunk, decrypt_block, unwrap_key};
use directio_client::Client;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};
use utils::{Credentials, ErrorPrinter};

use crate::block::Block;
use crate::error::{ChunkContext, DirectIoError, Result};
use crate::metadata::{Chunk, FileMetadata};

/// A file's chunk map together with its unwrapped content key.
#[derive(Clone)]
pub struct ResolvedFile {
    pub metadata: Arc<FileMetadata>,
    content_key: Option<Arc<[u8]>>,
}

impl ResolvedFile {
    pub fn new(metadata: FileMetadata, content_key: Option<Vec<u8>>) -> Self {
        Self {
            metadata: Arc::new(metadata),
            content_key: content_key.map(Arc::from),
        }
    }

    pub fn content_key(&self) -> Option<&[u8]> {
        self.content_key.as_deref()
    }
}

/// Looks up a file's chunk map and unwraps its content key.
///
/// Bearer credentials carry no secret; their key is unwrapped with an empty secret.
#[instrument(skip_all, name = "DirectIo::resolve", fields(file.id = file_id))]
pub async fn resolve(client: &dyn Client, file_id: &str, credentials: &Credentials) -> Result<ResolvedFile> {
    let response = client
        .get_file_metadata(file_id)
        .await
        .map_err(|e| DirectIoError::from_metadata_error(file_id, e))
        .info_error_fn(|| format!("Metadata lookup failed for {file_id}"))?;

    let metadata = FileMetadata::from_response(file_id, response).warn_error("Rejected file metadata")?;

    let content_key = match &metadata.wrapped_key {
        Some(wrapped_key) => {
            let secret = credentials.secret().unwrap_or_default();
            let key = unwrap_key(wrapped_key, secret).map_err(|source| DirectIoError::KeyUnwrap {
                file_id: file_id.to_owned(),
                source,
            })?;
            Some(key)
        },
        None => None,
    };

    info!(
        file_id,
        size = metadata.size(),
        num_chunks = metadata.num_chunks(),
        encrypted = metadata.encrypted,
        compression = %metadata.compression,
        "Resolved file metadata"
    );

    Ok(ResolvedFile::new(metadata, content_key))
}

/// Turns a downloaded payload into the chunk's plaintext and checks its length.
///
/// Decryption leaves cipher padding in place. Decompression ignores it; for uncompressed chunks up to one
/// cipher block of excess is trimmed before the length check.
pub fn decode_chunk(file: &FileMetadata, chunk: &Chunk, payload: Bytes, content_key: Option<&[u8]>) -> Result<Bytes> {
    let context = || ChunkContext::new(file, chunk);
    let mut data = payload;

    if file.encrypted {
        let key = content_key.ok_or_else(|| DirectIoError::BlockDecrypt {
            context: context(),
            source: ChunkCodecError::BlockDecrypt("no content key for encrypted file".to_owned()),
        })?;
        data = decrypt_block(&data, key)
            .map(Bytes::from)
            .map_err(|source| DirectIoError::BlockDecrypt {
                context: context(),
                source,
            })?;
    }

    if file.compressed() {
        data = decompress_chunk(file.compression, &data)
            .map(Bytes::from)
            .map_err(|source| DirectIoError::Decompress {
                context: context(),
                source,
            })?;
    } else if file.encrypted {
        let excess = (data.len() as u64).saturating_sub(chunk.length);
        if excess > 0 && excess <= AES_BLOCK_SIZE as u64 {
            data.truncate(chunk.length as usize);
        }
    }

    if data.len() as u64 != chunk.length {
        return Err(DirectIoError::BlockValidation {
            context: context(),
            actual_length: data.len() as u64,
        });
    }

    Ok(data)
}

async fn fetch_chunk(
    client: Arc<dyn Client>,
    file: ResolvedFile,
    chunk: Chunk,
    semaphore: Option<Arc<Semaphore>>,
) -> Result<Block> {
    let context = ChunkContext::new(&file.metadata, &chunk);

    let payload = {
        // Held for the download only.
        let _permit = match &semaphore {
            Some(semaphore) => Some(semaphore.acquire().await.map_err(|e| DirectIoError::TaskJoin {
                context: context.clone(),
                message: format!("concurrency limiter closed: {e}"),
            })?),
            None => None,
        };

        client
            .get_chunk(&chunk.location)
            .await
            .map_err(|e| DirectIoError::Download {
                context: context.clone(),
                source: Arc::new(e),
            })?
    };

    let payload_len = payload.len();
    let data = decode_chunk(&file.metadata, &chunk, payload, file.content_key())?;

    debug!(
        file_id = %context.file_id,
        chunk.index = chunk.index,
        chunk.offset = chunk.offset,
        chunk.length = chunk.length,
        payload_len,
        "Chunk retrieved"
    );

    Ok(Block {
        file_id: context.file_id,
        number: chunk.index,
        offset: chunk.offset,
        data,
    })
}

/// Schedules the download pipeline for each chunk and returns their handles in the order given.
///
/// At most `concurrency_limit` downloads are in flight at once; 0 means unlimited. Must be called from
/// within a tokio runtime.
pub fn fetch(client: Arc<dyn Client>, file: &ResolvedFile, chunks: Vec<Chunk>, concurrency_limit: usize) -> FetchHandles {
    let semaphore = (concurrency_limit > 0).then(|| Arc::new(Semaphore::new(concurrency_limit.min(Semaphore::MAX_PERMITS))));

    debug!(
        file_id = %file.metadata.file_id,
        num_chunks = chunks.len(),
        concurrency_limit,
        "Scheduling chunk downloads"
    );

    let pending = chunks
        .into_iter()
        .map(|chunk| {
            let context = ChunkContext::new(&file.metadata, &chunk);
            let handle = tokio::spawn(fetch_chunk(client.clone(), file.clone(), chunk, semaphore.clone()));
            (context, handle)
        })
        .collect();

    FetchHandles { pending }
}

/// Outstanding chunk tasks, consumed in chunk order. Dropping the handles aborts every task not yet consumed.
pub struct FetchHandles {
    pending: VecDeque<(ChunkContext, JoinHandle<Result<Block>>)>,
}

impl FetchHandles {
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Polls the next task in order; later tasks keep running in the background meanwhile.
    pub fn poll_next_block(&mut self, cx: &mut Context<'_>) -> Poll<Option<Result<Block>>> {
        let joined = match self.pending.front_mut() {
            Some((_, handle)) => ready!(Pin::new(handle).poll(cx)),
            None => return Poll::Ready(None),
        };

        let Some((context, _)) = self.pending.pop_front() else {
            return Poll::Ready(None);
        };

        Poll::Ready(Some(match joined {
            Ok(res) => res,
            Err(e) => Err(DirectIoError::TaskJoin {
                context,
                message: e.to_string(),
            }),
        }))
    }

    pub async fn next_block(&mut self) -> Option<Result<Block>> {
        poll_fn(|cx| self.poll_next_block(cx)).await
    }

    /// Awaits every task in order, stopping at the first failure.
    pub async fn join_all(mut self) -> Result<Vec<Block>> {
        let mut blocks = Vec::with_capacity(self.len());
        while let Some(block) = self.next_block().await {
            blocks.push(block?);
        }
        Ok(blocks)
    }

    /// Aborts all outstanding tasks and returns how many there were. Calling it again is a no-op.
    pub fn cancel(&mut self) -> usize {
        let n = self.pending.len();
        for (_, handle) in self.pending.drain(..) {
            handle.abort();
        }
        if n > 0 {
            debug!(n_cancelled = n, "Cancelled outstanding chunk downloads");
        }
        n
    }
}

impl Drop for FetchHandles {
    fn drop(&mut self) {
        self.cancel();
    }
}
