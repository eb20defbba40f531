#![cfg_attr(feature = "strict", deny(warnings))]

pub mod auth;
pub mod configuration_utils;
pub mod errors;

pub use auth::Credentials;
pub use configuration_utils::ParsableConfigValue;
pub use errors::ErrorPrinter;
