use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use directio_types::MetadataResponse;
use lazy_static::lazy_static;
use reqwest::{StatusCode, Url};
use reqwest_middleware::ClientWithMiddleware;
use tracing::{event, instrument};
use utils::Credentials;

use crate::error::{DirectIoClientError, Result};
use crate::http_client::{self, Api, HttpClientOptions};
use crate::retry_wrapper::{RetryConfig, RetryWrapper};
use crate::{Client, INFORMATION_LOG_LEVEL};

lazy_static! {
    static ref FN_CALL_ID: AtomicU64 = AtomicU64::new(1);
}

pub struct RemoteClient {
    endpoint: String,
    authenticated_http_client: Arc<ClientWithMiddleware>,
    http_client: Arc<ClientWithMiddleware>,
    retry_config: RetryConfig,
}

impl RemoteClient {
    /// Creates a client using the process-wide configuration.
    pub fn new(endpoint: &str, credentials: &Credentials) -> Result<Arc<Self>> {
        Self::new_with_config(endpoint, credentials, &directio_config::directio_config().client)
    }

    pub fn new_with_config(
        endpoint: &str,
        credentials: &Credentials,
        config: &directio_config::ClientConfig,
    ) -> Result<Arc<Self>> {
        let options = HttpClientOptions::from_config(config);

        // Fail early on an endpoint that cannot carry a path.
        let base = Url::parse(endpoint)?;
        if base.cannot_be_a_base() {
            return Err(DirectIoClientError::InvalidArguments(format!("endpoint {endpoint} cannot be a base url")));
        }

        Ok(Arc::new(Self {
            endpoint: endpoint.to_string(),
            authenticated_http_client: Arc::new(http_client::build_auth_http_client(credentials, &options)?),
            http_client: Arc::new(http_client::build_http_client(&options)?),
            retry_config: RetryConfig::from_config(config),
        }))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn metadata_url(&self, file_id: &str) -> Result<Url> {
        let mut url = Url::parse(&self.endpoint)?;
        url.path_segments_mut()
            .map_err(|_| DirectIoClientError::InvalidArguments(format!("endpoint {} cannot be a base url", self.endpoint)))?
            .pop_if_empty()
            .push(file_id);
        Ok(url)
    }
}

/// Maps the metadata service's status codes onto typed errors; anything else passes through.
fn map_metadata_error(file_id: &str, err: DirectIoClientError) -> DirectIoClientError {
    match err.status() {
        Some(StatusCode::BAD_REQUEST) => DirectIoClientError::NotFound(file_id.to_owned()),
        Some(StatusCode::UNAUTHORIZED) => DirectIoClientError::Unauthorized(file_id.to_owned()),
        Some(StatusCode::UNPROCESSABLE_ENTITY) => DirectIoClientError::UnprocessableContent(file_id.to_owned()),
        _ => err,
    }
}

#[async_trait::async_trait]
impl Client for RemoteClient {
    #[instrument(skip_all, name = "RemoteClient::get_file_metadata", fields(file.id = file_id))]
    async fn get_file_metadata(&self, file_id: &str) -> Result<MetadataResponse> {
        if file_id.is_empty() {
            return Err(DirectIoClientError::InvalidArguments("file id must not be empty".to_owned()));
        }

        let call_id = FN_CALL_ID.fetch_add(1, Ordering::Relaxed);
        let url = self.metadata_url(file_id)?;
        event!(INFORMATION_LOG_LEVEL, call_id, file_id, "Starting get_file_metadata API call");

        let api_tag = "metadata::get_file_metadata";
        let client = self.authenticated_http_client.clone();

        let response: MetadataResponse = RetryWrapper::new(api_tag)
            .with_retry_config(self.retry_config)
            .log_errors_as_info()
            .run_and_extract_json(move || client.get(url.clone()).with_extension(Api(api_tag)).send())
            .await
            .map_err(|e| map_metadata_error(file_id, e))?;

        event!(
            INFORMATION_LOG_LEVEL,
            call_id,
            file_id,
            num_chunks = response.chunks.len(),
            encrypted = response.encrypt_info.data_encrypted,
            compression = %response.compression_type,
            "Completed get_file_metadata API call",
        );

        Ok(response)
    }

    #[instrument(skip_all, name = "RemoteClient::get_chunk")]
    async fn get_chunk(&self, location: &str) -> Result<Bytes> {
        let call_id = FN_CALL_ID.fetch_add(1, Ordering::Relaxed);
        let url = Url::parse(location)?;
        event!(INFORMATION_LOG_LEVEL, call_id, host = url.host_str(), "Starting get_chunk API call");

        let api_tag = "object_store::get_chunk";
        let client = self.http_client.clone();

        let data = RetryWrapper::new(api_tag)
            .with_retry_config(self.retry_config)
            .run_and_extract_bytes(move || client.get(url.clone()).with_extension(Api(api_tag)).send())
            .await?;

        event!(INFORMATION_LOG_LEVEL, call_id, size = data.len(), "Completed get_chunk API call");

        Ok(data)
    }
}
