pub use http_client::{Api, HttpClientOptions, build_auth_http_client, build_http_client};
pub use interface::Client;
pub use local_client::{LocalClient, MetadataFailure, StoredFileOptions, local_chunk_location};
pub use remote_client::RemoteClient;
pub use retry_wrapper::RetryConfig;
use tracing::Level;

pub use crate::error::{DirectIoClientError, Result};

mod error;
pub mod http_client;
mod interface;
mod local_client;
pub mod local_server;
pub mod remote_client;
pub mod retry_wrapper;

pub mod client_testing_utils;

#[cfg(not(feature = "elevated_information_level"))]
pub const INFORMATION_LOG_LEVEL: Level = Level::DEBUG;

#[cfg(feature = "elevated_information_level")]
pub const INFORMATION_LOG_LEVEL: Level = Level::INFO;
