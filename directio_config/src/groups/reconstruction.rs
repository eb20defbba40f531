crate::config_group!({

    /// The maximum number of chunk downloads in flight at once for a streaming retrieval.
    ///
    /// The default value is 50.
    ///
    /// Use the environment variable `DIRECTIO_RECONSTRUCTION_STREAM_CONCURRENCY_LIMIT` to set this value.
    ref stream_concurrency_limit: usize = 50;

    /// The maximum number of chunk downloads in flight at once for a block retrieval.
    /// A value of 0 means unlimited.
    ///
    /// The default value is 0.
    ///
    /// Use the environment variable `DIRECTIO_RECONSTRUCTION_BLOCK_CONCURRENCY_LIMIT` to set this value.
    ref block_concurrency_limit: usize = 0;
});
