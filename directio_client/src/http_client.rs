use http::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::Response;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, Middleware, Next};
use tracing::{Instrument, debug, info_span};
use utils::Credentials;

use crate::error::Result;

/// Tag attached to each request as an extension so the logging middleware can name the call.
#[derive(Clone, Copy, Debug)]
pub struct Api(pub &'static str);

const REQUEST_ID_HEADERS: [&str; 2] = ["x-request-id", "x-amz-request-id"];

pub fn request_id_from_response(res: &Response) -> &str {
    REQUEST_ID_HEADERS
        .iter()
        .find_map(|name| res.headers().get(*name))
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

/// Settings for the underlying HTTP transport.
#[derive(Clone, Debug)]
pub struct HttpClientOptions {
    pub connect_timeout: std::time::Duration,
    pub read_timeout: std::time::Duration,
    pub user_agent: String,
}

impl HttpClientOptions {
    pub fn from_config(config: &directio_config::ClientConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout,
            read_timeout: config.read_timeout,
            user_agent: config.user_agent.clone(),
        }
    }
}

impl Default for HttpClientOptions {
    fn default() -> Self {
        Self::from_config(&directio_config::directio_config().client)
    }
}

/// Builds a client for the metadata service that sends `Authorization: Bearer <token>` on every request.
pub fn build_auth_http_client(credentials: &Credentials, options: &HttpClientOptions) -> Result<ClientWithMiddleware> {
    let mut auth_value = HeaderValue::from_str(&credentials.authorization_header())?;
    auth_value.set_sensitive(true);

    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, auth_value);

    build_with_headers(headers, options)
}

/// Builds a client for pre-signed object store URLs; no credentials are attached.
pub fn build_http_client(options: &HttpClientOptions) -> Result<ClientWithMiddleware> {
    build_with_headers(HeaderMap::new(), options)
}

fn build_with_headers(headers: HeaderMap, options: &HttpClientOptions) -> Result<ClientWithMiddleware> {
    let reqwest_client = reqwest::Client::builder()
        .default_headers(headers)
        .user_agent(options.user_agent.as_str())
        .connect_timeout(options.connect_timeout)
        .read_timeout(options.read_timeout)
        .build()?;

    Ok(ClientBuilder::new(reqwest_client).with(LoggingMiddleware).build())
}

/// Wraps every request in a span named after its [`Api`] tag and logs the outcome.
pub struct LoggingMiddleware;

#[async_trait::async_trait]
impl Middleware for LoggingMiddleware {
    async fn handle(
        &self,
        req: reqwest::Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> reqwest_middleware::Result<Response> {
        let api = extensions.get::<Api>().map(|a| a.0).unwrap_or("unknown");
        let span = info_span!("directio_request", api, method = %req.method(), host = req.url().host_str().unwrap_or(""));

        async move {
            let res = next.run(req, extensions).await;
            match &res {
                Ok(resp) => debug!(status = resp.status().as_u16(), request_id = request_id_from_response(resp), "response"),
                Err(e) => debug!(error = %e, "request failed"),
            }
            res
        }
        .instrument(span)
        .await
    }
}
