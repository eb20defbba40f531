use lazy_static::lazy_static;

use crate::groups;

lazy_static! {
    static ref DIRECTIO_CONFIG: DirectIoConfig = DirectIoConfig::new();
}

/// The process-wide configuration, created on first use from defaults plus
/// environment overrides.
pub fn directio_config() -> &'static DirectIoConfig {
    &DIRECTIO_CONFIG
}

/// Primary configuration struct containing all config sections
#[derive(Debug, Clone, Default)]
pub struct DirectIoConfig {
    pub client: groups::client::ConfigValueGroup,
    pub reconstruction: groups::reconstruction::ConfigValueGroup,
}

impl DirectIoConfig {
    /// Create a new DirectIoConfig instance with default values and apply environment variable overrides.
    /// This is equivalent to `DirectIoConfig::default().with_env_overrides()`.
    pub fn new() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply environment variable overrides to all configuration sections.
    /// The group name for each section is derived from its module name.
    /// Environment variables follow the pattern: DIRECTIO_{GROUP_NAME}_{FIELD_NAME}
    pub fn with_env_overrides(mut self) -> Self {
        self.client.apply_env_overrides();
        self.reconstruction.apply_env_overrides();
        self
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = DirectIoConfig::default();
        assert_eq!(config.client.retry_max_attempts, 3);
        assert_eq!(config.client.retry_base_delay, Duration::from_secs(1));
        assert_eq!(config.reconstruction.stream_concurrency_limit, 50);
        assert_eq!(config.reconstruction.block_concurrency_limit, 0);
    }

    #[test]
    fn test_env_override_and_alias() {
        // SAFETY: these variables are only read by this test.
        unsafe {
            std::env::set_var("DIRECTIO_RECONSTRUCTION_BLOCK_CONCURRENCY_LIMIT", "7");
            std::env::set_var("DIRECTIO_BACKOFF", "250ms");
        }

        let config = DirectIoConfig::new();
        assert_eq!(config.reconstruction.block_concurrency_limit, 7);
        assert_eq!(config.client.retry_base_delay, Duration::from_millis(250));

        unsafe {
            std::env::remove_var("DIRECTIO_RECONSTRUCTION_BLOCK_CONCURRENCY_LIMIT");
            std::env::remove_var("DIRECTIO_BACKOFF");
        }
    }
}
