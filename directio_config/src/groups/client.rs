use std::time::Duration;

crate::config_group!({

    /// The number of retries after the first attempt for a metadata or chunk request that fails
    /// with a connection or timeout error.  Other failures are never retried.
    ///
    /// The default value is 3.
    ///
    /// Use the environment variable `DIRECTIO_CLIENT_RETRY_MAX_ATTEMPTS` to set this value.
    ref retry_max_attempts: usize = 3;

    /// The base backoff between retries; retry `n` (1-based) sleeps `retry_base_delay * 2^(n-1)`.
    ///
    /// The default value is 1s.
    ///
    /// Use the environment variable `DIRECTIO_CLIENT_RETRY_BASE_DELAY` to set this value.
    ref retry_base_delay: Duration = Duration::from_secs(1);

    /// TCP connect timeout for all requests.
    ///
    /// The default value is 30s.
    ///
    /// Use the environment variable `DIRECTIO_CLIENT_CONNECT_TIMEOUT` to set this value.
    ref connect_timeout: Duration = Duration::from_secs(30);

    /// Per-read timeout on response bodies.
    ///
    /// The default value is 120s.
    ///
    /// Use the environment variable `DIRECTIO_CLIENT_READ_TIMEOUT` to set this value.
    ref read_timeout: Duration = Duration::from_secs(120);

    /// User agent sent with every request.
    ///
    /// Use the environment variable `DIRECTIO_CLIENT_USER_AGENT` to set this value.
    ref user_agent: String = concat!("directio", "/", env!("CARGO_PKG_VERSION")).to_string();
});
