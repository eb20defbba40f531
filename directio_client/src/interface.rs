use bytes::Bytes;
use directio_types::MetadataResponse;

use crate::error::Result;

/// A client to the metadata service and the object store behind it.
///
/// 1. `get_file_metadata` lists a file's chunk map and key material.
/// 2. `get_chunk` downloads one chunk payload from the location the metadata gave for it.
#[async_trait::async_trait]
pub trait Client: Send + Sync {
    /// Fails with `NotFound`, `Unauthorized` or `UnprocessableContent` for the corresponding service
    /// responses; connection failures are retried before surfacing.
    async fn get_file_metadata(&self, file_id: &str) -> Result<MetadataResponse>;

    /// Downloads the raw payload at `location`, retrying connection failures.
    async fn get_chunk(&self, location: &str) -> Result<Bytes>;
}
