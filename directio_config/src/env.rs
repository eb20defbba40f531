/// Alternate environment variable names accepted for a primary configuration variable,
/// as `(primary, alias)` pairs. The primary name wins when both are set.
pub const ENVIRONMENT_NAME_ALIASES: &[(&str, &str)] = &[
    ("DIRECTIO_CLIENT_RETRY_MAX_ATTEMPTS", "DIRECTIO_RETRIES"),
    ("DIRECTIO_CLIENT_RETRY_BASE_DELAY", "DIRECTIO_BACKOFF"),
    ("DIRECTIO_RECONSTRUCTION_STREAM_CONCURRENCY_LIMIT", "DIRECTIO_POOL_SIZE"),
];

/// Reads `name` from the environment, falling back to its aliases in table order.
pub fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().or_else(|| {
        ENVIRONMENT_NAME_ALIASES
            .iter()
            .filter(|(primary, _)| *primary == name)
            .find_map(|(_, alias)| std::env::var(alias).ok())
    })
}
