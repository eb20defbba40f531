use reqwest::StatusCode;
use thiserror::Error;

use crate::retry_wrapper::get_source_error_type;

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum DirectIoClientError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Unauthorized access to file: {0}")]
    Unauthorized(String),

    #[error("File not eligible for direct retrieval: {0}")]
    UnprocessableContent(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Invalid header value: {0}")]
    InvalidHeader(#[from] http::header::InvalidHeaderValue),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Reqwest Error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    #[error("Reqwest Middleware Error: {0}")]
    ReqwestMiddlewareError(anyhow::Error),

    #[error("URL Parse Error: {0}")]
    UrlParseError(#[from] url::ParseError),

    #[error("Other Error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, DirectIoClientError>;

impl DirectIoClientError {
    /// HTTP status of the failed request, if the failure came from a response.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            DirectIoClientError::ReqwestError(e) => e.status(),
            _ => None,
        }
    }

    /// True for failures to reach or hear back from the server: refused or dropped connections,
    /// timeouts and interrupted transfers.
    pub fn is_connection_error(&self) -> bool {
        match self {
            DirectIoClientError::ReqwestError(e) => {
                e.is_connect()
                    || e.is_timeout()
                    || e.is_body()
                    || get_source_error_type::<hyper::Error>(e).is_some_and(|h| h.is_incomplete_message())
                    || get_source_error_type::<std::io::Error>(e).is_some()
            },
            _ => false,
        }
    }
}

impl From<reqwest_middleware::Error> for DirectIoClientError {
    fn from(value: reqwest_middleware::Error) -> Self {
        match value {
            reqwest_middleware::Error::Middleware(e) => DirectIoClientError::ReqwestMiddlewareError(e),
            reqwest_middleware::Error::Reqwest(e) => DirectIoClientError::ReqwestError(e),
        }
    }
}
