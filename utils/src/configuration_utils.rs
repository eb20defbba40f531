use std::str::FromStr;
use std::time::Duration;

use tracing::{info, warn};

/// A configuration value that can be parsed from an environment variable string.
///
/// `parse` returns the default when the variable is unset or unparsable; parse failures
/// are logged and never fatal.
pub trait ParsableConfigValue: Sized {
    fn parse_user_value(value: &str) -> Option<Self>;

    fn parse(variable_name: &str, value: Option<String>, default: Self) -> Self {
        let Some(value) = value else {
            return default;
        };

        match Self::parse_user_value(&value) {
            Some(v) => {
                info!("Config: {variable_name} = {value:?} (user set)");
                v
            },
            None => {
                warn!("Configuration value {value:?} for {variable_name} cannot be parsed into correct type; ignoring.");
                default
            },
        }
    }
}

macro_rules! impl_parsable_via_from_str {
    ($($t:ty),+) => {
        $(
            impl ParsableConfigValue for $t {
                fn parse_user_value(value: &str) -> Option<Self> {
                    <$t>::from_str(value.trim()).ok()
                }
            }
        )+
    };
}

impl_parsable_via_from_str!(usize, u8, u16, u32, u64, isize, i32, i64, f32, f64);

impl ParsableConfigValue for bool {
    fn parse_user_value(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "y" | "on" => Some(true),
            "0" | "false" | "no" | "n" | "off" => Some(false),
            _ => None,
        }
    }
}

impl ParsableConfigValue for String {
    fn parse_user_value(value: &str) -> Option<Self> {
        Some(value.to_owned())
    }
}

impl ParsableConfigValue for Duration {
    /// Accepts a bare number of seconds or a number with one of the suffixes
    /// `ms`, `s`, `m`, `h`.
    fn parse_user_value(value: &str) -> Option<Self> {
        let value = value.trim();
        let split = value.find(|c: char| !(c.is_ascii_digit() || c == '.')).unwrap_or(value.len());
        let (number, unit) = value.split_at(split);
        let number: f64 = number.parse().ok()?;
        if !number.is_finite() || number < 0. {
            return None;
        }

        let seconds = match unit.trim() {
            "" | "s" | "sec" | "secs" => number,
            "ms" => number / 1000.,
            "m" | "min" | "mins" => number * 60.,
            "h" => number * 3600.,
            _ => return None,
        };

        Some(Duration::from_secs_f64(seconds))
    }
}
