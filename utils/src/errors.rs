use std::fmt::{Debug, Display};

use tracing::{error, info, warn};

/// Log-and-pass-through helpers for `Result` values.
///
/// Each method logs the error (if any) together with the given message and returns
/// the result unchanged, so they can be chained before `?`.
pub trait ErrorPrinter {
    fn log_error<M: Display>(self, message: M) -> Self;

    fn warn_error<M: Display>(self, message: M) -> Self;

    fn info_error<M: Display>(self, message: M) -> Self;

    fn info_error_fn<M: Display, F: FnOnce() -> M>(self, message_fn: F) -> Self;
}

impl<T, E: Debug> ErrorPrinter for Result<T, E> {
    fn log_error<M: Display>(self, message: M) -> Self {
        if let Err(ref e) = self {
            error!("{message}: {e:?}");
        }
        self
    }

    fn warn_error<M: Display>(self, message: M) -> Self {
        if let Err(ref e) = self {
            warn!("{message}: {e:?}");
        }
        self
    }

    fn info_error<M: Display>(self, message: M) -> Self {
        if let Err(ref e) = self {
            info!("{message}: {e:?}");
        }
        self
    }

    fn info_error_fn<M: Display, F: FnOnce() -> M>(self, message_fn: F) -> Self {
        if let Err(ref e) = self {
            info!("{}: {e:?}", message_fn());
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passthrough() {
        let ok: Result<u32, String> = Ok(3);
        assert_eq!(ok.log_error("unused"), Ok(3));

        let err: Result<u32, String> = Err("bad".to_owned());
        assert_eq!(err.clone().warn_error("context"), err);
        assert_eq!(err.clone().info_error_fn(|| "lazy context"), err);
    }
}
