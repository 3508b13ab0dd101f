//! Tracing subscriber initialisation.
//!
//! Logs are written to stderr so stdout stays reserved for the JSON emitted
//! by `baton cycle` and `baton status`. The filter is taken from `RUST_LOG`
//! and defaults to `info`.

use std::sync::OnceLock;

use thiserror::Error;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Filter applied when `RUST_LOG` is unset or unparsable.
pub const DEFAULT_FILTER: &str = "info";

static INIT: OnceLock<()> = OnceLock::new();

/// Raised when a global subscriber cannot be installed.
#[derive(Debug, Error)]
#[error("failed to initialise logging: {0}")]
pub struct LoggingError(String);

/// Installs the global subscriber. Repeated calls are no-ops.
///
/// # Errors
///
/// Returns [`LoggingError`] when another subscriber is already installed.
pub fn init() -> Result<(), LoggingError> {
    if INIT.get().is_some() {
        return Ok(());
    }

    tracing_subscriber::registry()
        .with(env_filter(std::env::var("RUST_LOG").ok().as_deref()))
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .try_init()
        .map_err(|err| LoggingError(err.to_string()))?;

    INIT.set(()).ok();
    Ok(())
}

fn env_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .filter(|value| !value.trim().is_empty())
        .and_then(|value| EnvFilter::try_new(value).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}
