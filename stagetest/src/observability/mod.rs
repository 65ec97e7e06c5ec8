//! Logging setup.
//!
//! Library code only emits `tracing` events. Test binaries call
//! [`init_tracing`] once to see them.

use crate::errors::HarnessError;
use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info";

/// Output format for [`init_tracing`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Installs a global `tracing` subscriber honouring `RUST_LOG`.
///
/// Output goes through the test writer so `cargo test` captures it per test.
///
/// # Errors
///
/// Returns [`HarnessError::Config`] if a global subscriber is already set.
pub fn init_tracing(format: LogFormat) -> Result<(), HarnessError> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_test_writer()
        .with_target(false);

    let result = match format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    result.map_err(|e| HarnessError::config(format!("Failed to install tracing subscriber: {e}")))
}
