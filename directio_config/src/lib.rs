mod env;
pub use env::{ENVIRONMENT_NAME_ALIASES, env_value};

pub mod directio_config;
pub mod macros;

pub mod groups;

// Re-exported for use inside the config_group macro.
pub use utils::configuration_utils::ParsableConfigValue;
pub use directio_config::{DirectIoConfig, directio_config};

pub type ClientConfig = groups::client::ConfigValueGroup;
pub type ReconstructionConfig = groups::reconstruction::ConfigValueGroup;
