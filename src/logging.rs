//! Tracing subscriber setup for binaries and tests.

use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{BundleError, Result};

/// Installs a formatted subscriber filtered by `filter` (an `EnvFilter`
/// directive such as `info` or `strata::deps=debug`).
///
/// Fails if the directive does not parse or a subscriber is already set.
pub fn init_logging(filter: &str) -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_new(filter)
                .map_err(|e| BundleError::InvalidArgument(format!("invalid log filter: {e}")))?,
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|_| BundleError::InvalidArgument("logging already initialized".into()))
}
