//! Local metadata service and object store.
//!
//! `LocalServer` wraps a [`LocalClient`] and serves it over HTTP with the routes `RemoteClient` expects:
//!
//! - `GET /{file_id}`: the metadata listing; chunk urls point at this server.
//! - `GET /chunks/{file_id}/{index}`: one chunk payload.
//! - `GET /health`
//!
//! # Example
//!
//! ```no_run
//! use directio_client::LocalClient;
//! use directio_client::local_server::{LocalServer, LocalServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = LocalServerConfig {
//!         host: "127.0.0.1".to_string(),
//!         port: 8080,
//!     };
//!     let server = LocalServer::new(config, LocalClient::new());
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use utils::Credentials;

use super::handlers;
use crate::error::{DirectIoClientError, Result};
use crate::{LocalClient, RemoteClient};

/// Configuration for the local server.
#[derive(Clone, Debug)]
pub struct LocalServerConfig {
    /// Network interface to bind to (e.g., "127.0.0.1" or "0.0.0.0").
    pub host: String,
    /// TCP port number for the HTTP server.
    pub port: u16,
}

impl Default for LocalServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

pub(super) struct ServerState {
    pub(super) client: Arc<LocalClient>,
    /// Base url written into chunk locations.
    pub(super) endpoint: String,
}

pub struct LocalServer {
    config: LocalServerConfig,
    client: Arc<LocalClient>,
}

impl LocalServer {
    pub fn new(config: LocalServerConfig, client: Arc<LocalClient>) -> Self {
        Self { config, client }
    }

    pub fn client(&self) -> Arc<LocalClient> {
        self.client.clone()
    }

    /// Returns the server's bind address as "host:port".
    pub fn addr(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }

    pub fn endpoint(&self) -> String {
        format!("http://{}", self.addr())
    }

    fn create_router(&self) -> Router {
        let state = Arc::new(ServerState {
            client: self.client.clone(),
            endpoint: self.endpoint(),
        });

        Router::new()
            .route("/health", get(handlers::health_check))
            .route("/chunks/{file_id}/{index}", get(handlers::get_chunk))
            .route("/{file_id}", get(handlers::get_file_metadata))
            .with_state(state)
    }

    async fn bind(&self) -> Result<TcpListener> {
        let addr: SocketAddr = self
            .addr()
            .parse()
            .map_err(|e| DirectIoClientError::Other(format!("Failed to parse address: {e}")))?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| DirectIoClientError::Other(format!("Failed to bind to {addr}: {e}")))?;

        tracing::info!("Local DirectIO server listening on {}", addr);
        Ok(listener)
    }

    /// Runs the server until the process exits.
    pub async fn run(&self) -> Result<()> {
        let listener = self.bind().await?;

        axum::serve(listener, self.create_router().into_make_service())
            .await
            .map_err(|e| DirectIoClientError::Other(format!("Server error: {e}")))
    }

    /// Runs the server until a shutdown signal is received on the provided channel.
    pub async fn run_until_stopped(&self, shutdown_rx: oneshot::Receiver<()>) -> Result<()> {
        let listener = self.bind().await?;

        axum::serve(listener, self.create_router().into_make_service())
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .map_err(|e| DirectIoClientError::Other(format!("Server error: {e}")))
    }
}

/// A `LocalServer` on a free localhost port, running as a spawned task and shut down when dropped.
///
/// # Example
///
/// ```ignore
/// let server = LocalTestServer::start().await;
/// let file = server.local_client().upload_random_file("f", &[100, 100], &StoredFileOptions::default()).await?;
/// let metadata = server.remote_client().get_file_metadata("f").await?;
/// ```
pub struct LocalTestServer {
    endpoint: String,
    server_shutdown_tx: Option<oneshot::Sender<()>>,
    credentials: Credentials,
    remote_client: Arc<RemoteClient>,
    local_client: Arc<LocalClient>,
}

pub const TEST_ACCESS_KEY_ID: &str = "test-access-key";

impl LocalTestServer {
    /// Starts a server over an empty `LocalClient` that requires [`TEST_ACCESS_KEY_ID`] as its bearer token.
    pub async fn start() -> Self {
        Self::start_with_client(LocalClient::with_required_token(TEST_ACCESS_KEY_ID)).await
    }

    pub async fn start_with_client(local_client: Arc<LocalClient>) -> Self {
        let port = Self::find_available_port();
        let host = "127.0.0.1".to_string();

        let server = LocalServer::new(LocalServerConfig { host, port }, local_client.clone());
        let endpoint = server.endpoint();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        tokio::spawn(async move {
            let _ = server.run_until_stopped(shutdown_rx).await;
        });

        tokio::time::sleep(Duration::from_millis(50)).await;

        let credentials = Credentials::key_pair(local_client.required_token().unwrap_or(TEST_ACCESS_KEY_ID), "");
        let remote_client = RemoteClient::new(&endpoint, &credentials).unwrap();

        Self {
            endpoint,
            server_shutdown_tx: Some(shutdown_tx),
            credentials,
            remote_client,
            local_client,
        }
    }

    /// Returns the HTTP endpoint URL (e.g., "http://127.0.0.1:12345").
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Credentials the server accepts; the secret is empty.
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn remote_client(&self) -> &Arc<RemoteClient> {
        &self.remote_client
    }

    pub fn local_client(&self) -> &Arc<LocalClient> {
        &self.local_client
    }

    fn find_available_port() -> u16 {
        StdTcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port()
    }
}

impl Drop for LocalTestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.server_shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client_testing_utils::ClientTestingUtils;
    use crate::local_client::MetadataFailure;
    use crate::{Client, StoredFileOptions};

    #[tokio::test]
    async fn test_basic_correctness() {
        let server = LocalTestServer::start().await;
        let file = server
            .local_client()
            .upload_random_file("file-a", &[100, 200, 50], &StoredFileOptions::snappy())
            .await
            .unwrap();

        let remote = server.remote_client().get_file_metadata("file-a").await.unwrap();
        let local = server.local_client().get_file_metadata("file-a").await.unwrap();
        assert_eq!(remote.chunks.len(), 3);
        assert_eq!(remote.compression_type, local.compression_type);

        for (i, chunk) in remote.chunks.iter().enumerate() {
            assert!(chunk.url.starts_with(server.endpoint()));
            assert_eq!(chunk.len, file.chunk_lengths[i] as u64);

            let remote_payload = server.remote_client().get_chunk(&chunk.url).await.unwrap();
            let local_payload = server.local_client().get_chunk(&local.chunks[i].url).await.unwrap();
            assert_eq!(remote_payload, local_payload);
        }
    }

    #[tokio::test]
    async fn test_error_handling() {
        let server = LocalTestServer::start().await;
        server
            .local_client()
            .upload_random_file("file-b", &[10], &StoredFileOptions::default())
            .await
            .unwrap();

        let remote = server.remote_client();
        assert!(matches!(remote.get_file_metadata("missing").await, Err(DirectIoClientError::NotFound(_))));

        server
            .local_client()
            .set_metadata_failure("file-b", Some(MetadataFailure::UnprocessableContent))
            .await
            .unwrap();
        assert!(matches!(
            remote.get_file_metadata("file-b").await,
            Err(DirectIoClientError::UnprocessableContent(_))
        ));

        let bad_chunk = format!("{}/chunks/file-b/7", server.endpoint());
        assert_eq!(
            remote.get_chunk(&bad_chunk).await.unwrap_err().status(),
            Some(reqwest::StatusCode::NOT_FOUND)
        );
    }

    #[tokio::test]
    async fn test_rejects_wrong_token() {
        let server = LocalTestServer::start().await;
        server
            .local_client()
            .upload_random_file("file-c", &[10], &StoredFileOptions::default())
            .await
            .unwrap();

        let intruder = RemoteClient::new(server.endpoint(), &Credentials::bearer("wrong")).unwrap();
        assert!(matches!(intruder.get_file_metadata("file-c").await, Err(DirectIoClientError::Unauthorized(_))));
        assert!(server.remote_client().get_file_metadata("file-c").await.is_ok());
    }

    #[tokio::test]
    async fn test_health() {
        let server = LocalTestServer::start().await;
        let resp = reqwest::get(format!("{}/health", server.endpoint())).await.unwrap();
        assert!(resp.status().is_success());
    }

    #[test]
    fn test_server_creation() {
        let server = LocalServer::new(LocalServerConfig::default(), LocalClient::new());
        assert_eq!(server.addr(), "127.0.0.1:8080");
        assert_eq!(server.endpoint(), "http://127.0.0.1:8080");
        assert_eq!(server.client().chunk_request_count(), 0);
    }
}
