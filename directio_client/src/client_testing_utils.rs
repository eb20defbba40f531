//! Helpers for exercising clients against misbehaving servers and for populating a [`LocalClient`].

use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chunk_codec::test_utils::random_bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::local_client::{LocalClient, StoredFileOptions};

/// A url on localhost where nothing is listening, so connecting is refused.
pub fn unused_local_url() -> String {
    let port = StdTcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
    format!("http://127.0.0.1:{port}/unused")
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureMode {
    /// Read the request, then close the connection without answering.
    DropConnection,
    /// Read the request and never answer.
    Hang,
}

/// A raw TCP server that fails the first `n_failures` connections and then answers every request with
/// `200 OK` and a fixed body.
pub struct FlakyServer {
    addr: SocketAddr,
    connections: Arc<AtomicUsize>,
    accept_task: JoinHandle<()>,
}

impl FlakyServer {
    pub async fn start(n_failures: usize, mode: FailureMode, body: Bytes) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(AtomicUsize::new(0));

        let connections_ = connections.clone();
        let accept_task = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let n = connections_.fetch_add(1, Ordering::SeqCst);
                let body = body.clone();
                tokio::spawn(async move {
                    Self::handle_connection(socket, n < n_failures, mode, body).await;
                });
            }
        });

        Self {
            addr,
            connections,
            accept_task,
        }
    }

    async fn handle_connection(mut socket: TcpStream, fail: bool, mode: FailureMode, body: Bytes) {
        let mut buf = Vec::new();
        let mut read_buf = [0u8; 1024];
        while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
            match socket.read(&mut read_buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => buf.extend_from_slice(&read_buf[..n]),
            }
        }

        if fail {
            match mode {
                FailureMode::DropConnection => drop(socket),
                FailureMode::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                },
            }
            return;
        }

        let header = format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n", body.len());
        let _ = socket.write_all(header.as_bytes()).await;
        let _ = socket.write_all(&body).await;
        let _ = socket.shutdown().await;
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    /// Number of connections accepted so far.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl Drop for FlakyServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

/// A file stored through [`ClientTestingUtils::upload_random_file`].
#[derive(Clone, Debug)]
pub struct RandomFileContents {
    pub file_id: String,
    pub data: Vec<u8>,
    pub chunk_lengths: Vec<usize>,
    pub content_key: Option<Vec<u8>>,
}

impl RandomFileContents {
    /// Offset of each chunk within the file.
    pub fn chunk_offsets(&self) -> Vec<usize> {
        self.chunk_lengths
            .iter()
            .scan(0, |offset, len| {
                let start = *offset;
                *offset += len;
                Some(start)
            })
            .collect()
    }

    /// Plaintext of the chunk at a 0-based index.
    pub fn chunk_data(&self, index: usize) -> &[u8] {
        let start = self.chunk_offsets()[index];
        &self.data[start..start + self.chunk_lengths[index]]
    }
}

#[async_trait]
pub trait ClientTestingUtils {
    async fn upload_random_file(
        &self,
        file_id: &str,
        chunk_lengths: &[usize],
        options: &StoredFileOptions,
    ) -> Result<RandomFileContents>;
}

#[async_trait]
impl ClientTestingUtils for LocalClient {
    async fn upload_random_file(
        &self,
        file_id: &str,
        chunk_lengths: &[usize],
        options: &StoredFileOptions,
    ) -> Result<RandomFileContents> {
        let data = random_bytes(chunk_lengths.iter().sum());
        let content_key = self.upload_file(file_id, &data, chunk_lengths, options).await?;
        Ok(RandomFileContents {
            file_id: file_id.to_owned(),
            data,
            chunk_lengths: chunk_lengths.to_vec(),
            content_key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Client;

    #[tokio::test]
    async fn test_upload_random_file() {
        let client = LocalClient::new();
        let file = client
            .upload_random_file("r", &[10, 20, 30], &StoredFileOptions::snappy())
            .await
            .unwrap();
        assert_eq!(file.data.len(), 60);
        assert_eq!(file.chunk_offsets(), vec![0, 10, 30]);
        assert_eq!(file.chunk_data(2), &file.data[30..60]);
        assert_eq!(client.get_file_metadata("r").await.unwrap().chunks.len(), 3);
    }

    #[tokio::test]
    async fn test_flaky_server_answers_after_failures() {
        let server = FlakyServer::start(1, FailureMode::DropConnection, Bytes::from_static(b"ok")).await;
        let client = reqwest::Client::new();

        assert!(client.get(server.url("/")).send().await.is_err());
        let resp = client.get(server.url("/")).send().await.unwrap();
        assert_eq!(&resp.bytes().await.unwrap()[..], b"ok");
        assert_eq!(server.connection_count(), 2);
    }
}
