use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use reqwest::Response;
use reqwest_retry::Retryable;
use tokio_retry::RetryIf;
use tracing::{error, info};

use crate::error::DirectIoClientError;
use crate::http_client::request_id_from_response;

#[derive(Debug)]
pub enum RetryableReqwestError {
    FatalError(DirectIoClientError),
    RetryableError(DirectIoClientError),
}

/// Retry budget shared by every request a client makes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_attempts: usize,
    /// Retry `n` (1-based) waits `base_delay * 2^(n-1)`.
    pub base_delay: Duration,
}

impl RetryConfig {
    pub fn from_config(config: &directio_config::ClientConfig) -> Self {
        Self {
            max_attempts: config.retry_max_attempts,
            base_delay: config.retry_base_delay,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::from_config(&directio_config::directio_config().client)
    }
}

/// Delays between successive attempts: `base, 2*base, 4*base, ...`, one per retry.
pub fn backoff_delays(base_delay: Duration, max_retries: usize) -> impl Iterator<Item = Duration> {
    (0..max_retries).map(move |i| base_delay.saturating_mul(2u32.saturating_pow(i as u32)))
}

pub struct RetryWrapper {
    max_attempts: usize,
    base_delay: Duration,
    log_errors_as_info: bool,
    api_tag: &'static str,
}

impl RetryWrapper {
    pub fn new(api_tag: &'static str) -> Self {
        let config = RetryConfig::default();
        Self {
            max_attempts: config.max_attempts,
            base_delay: config.base_delay,
            log_errors_as_info: false,
            api_tag,
        }
    }

    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.max_attempts = config.max_attempts;
        self.base_delay = config.base_delay;
        self
    }

    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn log_errors_as_info(mut self) -> Self {
        self.log_errors_as_info = true;
        self
    }

    fn process_error_response(&self, try_idx: usize, err: reqwest_middleware::Error) -> RetryableReqwestError {
        let api = &self.api_tag;

        let process_error = |txt, log_as_info, err: reqwest_middleware::Error| {
            let msg = {
                if try_idx > 0 {
                    format!("{txt}: {api} api call failed (retry {try_idx}): {err}")
                } else {
                    format!("{txt}: {api} api call failed: {err}")
                }
            };

            info!(api = self.api_tag, "Connection attempt {}/{}", try_idx + 1, self.max_attempts + 1);

            if self.log_errors_as_info || log_as_info {
                info!("{msg}");
            } else {
                error!("{msg}");
            }

            DirectIoClientError::from(err)
        };

        match on_request_failure(&err) {
            Some(Retryable::Transient) => {
                let client_err = process_error("Retryable Client Error", true, err);
                RetryableReqwestError::RetryableError(client_err)
            },
            Some(Retryable::Fatal) => {
                let client_err = process_error("Fatal Client Error", false, err);
                RetryableReqwestError::FatalError(client_err)
            },
            None => {
                let client_err = process_error("Unknown Client Error", true, err);
                RetryableReqwestError::FatalError(client_err)
            },
        }
    }

    /// Any non-success status is fatal; only transport failures are retried.
    fn process_ok_response(&self, try_idx: usize, resp: Response) -> Result<Response, RetryableReqwestError> {
        let request_id = request_id_from_response(&resp).to_owned();

        let retry_str = if try_idx == 0 {
            String::default()
        } else {
            format!(", retry {try_idx}")
        };

        let api = &self.api_tag;

        match resp.error_for_status() {
            Ok(result) => {
                info!("Request Success: {api} api call succeeded (request id {request_id}{retry_str}).");
                Ok(result)
            },
            Err(e) => {
                if self.log_errors_as_info {
                    info!("Fatal Error: {api:?} api call failed (request id {request_id}{retry_str}): {e}");
                } else {
                    error!("Fatal Error: {api:?} api call failed (request id {request_id}{retry_str}): {e}");
                }
                Err(RetryableReqwestError::FatalError(DirectIoClientError::from(e)))
            },
        }
    }

    /// Run a request and process the result, retrying on connection and timeout errors or if the process_fn
    /// returns a retryable error.
    ///
    /// The `make_request` function returns a future that resolves to a Result<Response> object as is returned by
    /// the client middleware.  For example, `|| client.clone().get(url).send()` returns a future (as `send()` is
    /// async) that will then be evaluated to get the response.
    ///
    /// The process_fn takes a successful response and returns a future that evaluates that response into an object
    /// of type `Result<T, RetryableReqwestError>`.  A RetryableError from it restarts the entire request.
    pub async fn run_and_process<T, ReqFut, ReqFn, ProcFut, ProcFn>(
        self,
        make_request: ReqFn,
        process_fn: ProcFn,
    ) -> Result<T, DirectIoClientError>
    where
        ReqFn: Fn() -> ReqFut + Send + Sync + 'static,
        ReqFut: Future<Output = Result<Response, reqwest_middleware::Error>> + 'static,
        ProcFn: Fn(Response) -> ProcFut + Send + Sync + 'static,
        ProcFut: Future<Output = Result<T, RetryableReqwestError>> + 'static,
    {
        let strategy = backoff_delays(self.base_delay, self.max_attempts);

        info!(
            api = self.api_tag,
            max_attempts = self.max_attempts,
            base_delay=?self.base_delay,
            "Retry strategy",
        );

        let self_ = Arc::new(self);
        let try_count = AtomicUsize::new(0);

        let retry_info = Arc::new((make_request, process_fn, try_count, self_.clone()));

        let result = RetryIf::start(
            strategy,
            move || {
                let retry_info = retry_info.clone();

                async move {
                    let (make_request, process_fn, try_count, self_) = retry_info.as_ref();

                    let resp_result = make_request().await;
                    let try_idx = try_count.fetch_add(1, Ordering::Relaxed);

                    let checked_result = match resp_result {
                        Err(e) => Err(self_.process_error_response(try_idx, e)),
                        Ok(resp) => self_.process_ok_response(try_idx, resp),
                    };

                    match checked_result {
                        Ok(ok_response) => process_fn(ok_response).await,
                        Err(e) => Err(e),
                    }
                }
            },
            |err: &RetryableReqwestError| matches!(err, RetryableReqwestError::RetryableError(_)),
        )
        .await;

        match result {
            Ok(r) => Ok(r),
            Err(RetryableReqwestError::FatalError(e)) => Err(e),
            Err(RetryableReqwestError::RetryableError(e)) => {
                if self_.log_errors_as_info {
                    info!("No more retries; aborting: {e}");
                } else {
                    error!("No more retries; aborting: {e}");
                }

                Err(e)
            },
        }
    }

    /// Run a request and parse the body as json. Interrupted transfers are retried; a complete body that is not
    /// valid json is a fatal [`DirectIoClientError::InvalidResponse`].
    pub async fn run_and_extract_json<JsonDest, ReqFn, ReqFut>(
        self,
        make_request: ReqFn,
    ) -> Result<JsonDest, DirectIoClientError>
    where
        JsonDest: for<'de> serde::Deserialize<'de>,
        ReqFn: Fn() -> ReqFut + Send + Sync + 'static,
        ReqFut: Future<Output = Result<Response, reqwest_middleware::Error>> + 'static,
    {
        self.run_and_process(make_request, |resp: Response| async move {
            let body = read_body(resp).await?;
            serde_json::from_slice(&body).map_err(|e| {
                RetryableReqwestError::FatalError(DirectIoClientError::InvalidResponse(format!(
                    "json body could not be parsed: {e}"
                )))
            })
        })
        .await
    }

    /// Run a request and collect the body, retrying the whole request if the transfer is interrupted.
    pub async fn run_and_extract_bytes<ReqFut, ReqFn>(self, make_request: ReqFn) -> Result<Bytes, DirectIoClientError>
    where
        ReqFn: Fn() -> ReqFut + Send + Sync + 'static,
        ReqFut: Future<Output = Result<Response, reqwest_middleware::Error>> + 'static,
    {
        self.run_and_process(make_request, read_body).await
    }

    /// Run a request, retrying on connection and timeout errors, and return the successful response.
    pub async fn run<ReqFut, ReqFn>(self, make_request: ReqFn) -> Result<Response, DirectIoClientError>
    where
        ReqFn: Fn() -> ReqFut + Send + Sync + 'static,
        ReqFut: Future<Output = Result<Response, reqwest_middleware::Error>> + 'static,
    {
        self.run_and_process(make_request, |resp| async move { Ok(resp) }).await
    }
}

async fn read_body(resp: Response) -> Result<Bytes, RetryableReqwestError> {
    match resp.bytes().await {
        Ok(v) => Ok(v),
        Err(e) => {
            if e.is_connect() || e.is_body() || e.is_timeout() || e.is_decode() {
                // Incomplete response from the server, possibly a dropped connection.
                Err(RetryableReqwestError::RetryableError(e.into()))
            } else {
                Err(RetryableReqwestError::FatalError(e.into()))
            }
        },
    }
}

/// Classifies a failed request. Timeouts, refused connections and connections cut mid-message are transient;
/// everything else, including middleware failures, is fatal.
///
/// Like `reqwest_retry::default_on_request_failure`, but also retries every IO error and never looks at status
/// codes.
pub fn on_request_failure(error: &reqwest_middleware::Error) -> Option<Retryable> {
    let reqwest_middleware::Error::Reqwest(error) = error else {
        return Some(Retryable::Fatal);
    };

    if error.is_timeout() || error.is_connect() {
        Some(Retryable::Transient)
    } else if error.is_body() || error.is_decode() || error.is_builder() || error.is_redirect() {
        Some(Retryable::Fatal)
    } else if error.is_request() {
        // hyper::Error(IncompleteMessage) is raised when the connection is cut before the whole response arrived;
        // reqwest reports it as a generic request error.
        if let Some(hyper_error) = get_source_error_type::<hyper::Error>(error) {
            let is_io_error = get_source_error_type::<std::io::Error>(hyper_error).is_some();
            if hyper_error.is_incomplete_message() || hyper_error.is_canceled() || is_io_error {
                Some(Retryable::Transient)
            } else {
                Some(Retryable::Fatal)
            }
        } else if get_source_error_type::<std::io::Error>(error).is_some() {
            Some(Retryable::Transient)
        } else {
            Some(Retryable::Fatal)
        }
    } else {
        None
    }
}

/// Downcasts the given err source into T.
///
/// Note: copied from `reqwest_middleware::get_source_error_type` since that is not publicly exported.
pub(crate) fn get_source_error_type<T: std::error::Error + 'static>(err: &dyn std::error::Error) -> Option<&T> {
    let mut source = err.source();

    while let Some(err) = source {
        if let Some(err) = err.downcast_ref::<T>() {
            return Some(err);
        }

        source = err.source();
    }
    None
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use reqwest::StatusCode;
    use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
    use serde::{Deserialize, Serialize};
    use tracing_test::traced_test;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::client_testing_utils::{FailureMode, FlakyServer, unused_local_url};

    fn fast_retries(api: &'static str) -> RetryWrapper {
        RetryWrapper::new(api)
            .with_base_delay(Duration::from_millis(5))
            .with_max_attempts(3)
    }

    fn plain_client() -> ClientWithMiddleware {
        ClientBuilder::new(reqwest::Client::new()).build()
    }

    async fn check_success_first_try(server: &MockServer) {
        let _guard = Mock::given(method("GET"))
            .and(path("/success"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount_as_scoped(server)
            .await;

        let client = plain_client();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_ = counter.clone();
        let server_uri = server.uri();

        let result = fast_retries("check_success_first_try")
            .run(move || {
                let url = format!("{}/success", server_uri);
                counter_.fetch_add(1, Ordering::Relaxed);
                client.clone().get(&url).send()
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    async fn check_server_error_not_retried(server: &MockServer) {
        let _guard = Mock::given(method("GET"))
            .and(path("/fail"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount_as_scoped(server)
            .await;

        let client = plain_client();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_ = counter.clone();
        let server_uri = server.uri();

        let result = fast_retries("check_server_error_not_retried")
            .run(move || {
                let url = format!("{}/fail", server_uri);
                counter_.fetch_add(1, Ordering::Relaxed);
                client.clone().get(&url).send()
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    async fn check_non_retryable_status(server: &MockServer) {
        for (route, status) in [("/bad_request", 400), ("/unauthorized", 401), ("/unprocessable", 422), ("/limit", 429)] {
            let _guard = Mock::given(method("GET"))
                .and(path(route))
                .respond_with(ResponseTemplate::new(status))
                .expect(1)
                .mount_as_scoped(server)
                .await;

            let client = plain_client();
            let counter = Arc::new(AtomicU32::new(0));
            let counter_ = counter.clone();
            let url = format!("{}{route}", server.uri());

            let result = fast_retries("check_non_retryable_status")
                .run(move || {
                    counter_.fetch_add(1, Ordering::Relaxed);
                    client.clone().get(&url).send()
                })
                .await;

            assert_eq!(result.unwrap_err().status().map(|s| s.as_u16()), Some(status));
            assert_eq!(counter.load(Ordering::SeqCst), 1);
        }
    }

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct MetadataLike {
        file_id: String,
        num_chunks: u64,
    }

    async fn check_json_body_parsed(server: &MockServer) {
        let data = MetadataLike {
            file_id: "f-1".into(),
            num_chunks: 42,
        };

        let _guard = Mock::given(method("GET"))
            .and(path("/json"))
            .respond_with(ResponseTemplate::new(StatusCode::OK).set_body_json(&data))
            .expect(1)
            .mount_as_scoped(server)
            .await;

        let client = plain_client();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_ = counter.clone();
        let server_uri = server.uri();

        let ret_data: MetadataLike = fast_retries("check_json_body_parsed")
            .run_and_extract_json(move || {
                let url = format!("{}/json", server_uri);
                counter_.fetch_add(1, Ordering::Relaxed);
                client.clone().get(&url).send()
            })
            .await
            .unwrap();

        assert_eq!(ret_data, data);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    async fn check_malformed_json_not_retried(server: &MockServer) {
        let data = MetadataLike {
            file_id: "f-1".into(),
            num_chunks: 42,
        };
        let json_data = serde_json::to_string(&data).unwrap();

        let _guard = Mock::given(method("GET"))
            .and(path("/json_bad"))
            .respond_with(ResponseTemplate::new(StatusCode::OK).set_body_string(&json_data[..json_data.len() - 5]))
            .expect(1)
            .mount_as_scoped(server)
            .await;

        let client = plain_client();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_ = counter.clone();
        let server_uri = server.uri();

        let result: Result<MetadataLike, _> = fast_retries("check_malformed_json_not_retried")
            .run_and_extract_json(move || {
                let url = format!("{}/json_bad", server_uri);
                counter_.fetch_add(1, Ordering::Relaxed);
                client.clone().get(&url).send()
            })
            .await;

        assert!(matches!(result, Err(DirectIoClientError::InvalidResponse(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_wrapper() {
        let server = MockServer::start().await;

        check_success_first_try(&server).await;
        check_server_error_not_retried(&server).await;
        check_non_retryable_status(&server).await;
        check_json_body_parsed(&server).await;
        check_malformed_json_not_retried(&server).await;
    }

    #[tokio::test]
    #[traced_test]
    async fn test_connection_refused_exhausts_retries() {
        let url = unused_local_url();
        let client = plain_client();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_ = counter.clone();

        let result = fast_retries("test_connection_refused_exhausts_retries")
            .run(move || {
                counter_.fetch_add(1, Ordering::Relaxed);
                client.clone().get(&url).send()
            })
            .await;

        let err = result.unwrap_err();
        assert!(err.is_connection_error());
        // 1 initial + 3 retries
        assert_eq!(counter.load(Ordering::SeqCst), 4);
        assert!(logs_contain("No more retries; aborting"));
    }

    #[tokio::test]
    async fn test_dropped_connections_then_success() {
        let server = FlakyServer::start(2, FailureMode::DropConnection, Bytes::from_static(b"Recovered")).await;
        let client = plain_client();
        let url = server.url("/chunk");

        let result = fast_retries("test_dropped_connections_then_success")
            .run_and_extract_bytes(move || client.clone().get(&url).send())
            .await;

        assert_eq!(&result.unwrap()[..], b"Recovered");
        assert_eq!(server.connection_count(), 3);
    }

    #[tokio::test]
    async fn test_dropped_connections_exhaust_retries() {
        let server = FlakyServer::start(4, FailureMode::DropConnection, Bytes::from_static(b"never")).await;
        let client = plain_client();
        let url = server.url("/chunk");

        let result = fast_retries("test_dropped_connections_exhaust_retries")
            .run_and_extract_bytes(move || client.clone().get(&url).send())
            .await;

        assert!(result.unwrap_err().is_connection_error());
        assert_eq!(server.connection_count(), 4);
    }

    #[tokio::test]
    async fn test_timeout_is_retried() {
        let server = FlakyServer::start(1, FailureMode::Hang, Bytes::from_static(b"late")).await;
        let client = ClientBuilder::new(reqwest::Client::builder().timeout(Duration::from_millis(200)).build().unwrap())
            .build();
        let url = server.url("/slow");

        let result = fast_retries("test_timeout_is_retried")
            .run_and_extract_bytes(move || client.clone().get(&url).send())
            .await;

        assert_eq!(&result.unwrap()[..], b"late");
        assert_eq!(server.connection_count(), 2);
    }

    #[test]
    fn test_backoff_delays() {
        let delays: Vec<_> = backoff_delays(Duration::from_secs(1), 3).collect();
        assert_eq!(delays, vec![Duration::from_secs(1), Duration::from_secs(2), Duration::from_secs(4)]);

        assert_eq!(backoff_delays(Duration::from_secs(1), 0).count(), 0);

        // Saturates rather than overflowing.
        let last = backoff_delays(Duration::from_secs(1), 80).last().unwrap();
        assert!(last >= Duration::from_secs(1 << 31));
    }
}
