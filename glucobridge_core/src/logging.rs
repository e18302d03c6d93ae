//! Logging infrastructure for glucobridge.
//!
//! Provides centralized tracing setup for the bridge binary.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize logging with sensible defaults
///
/// Default level is INFO, but can be overridden with RUST_LOG env var.
pub fn init() {
    init_with_level("info")
}

/// Initialize logging with a specific default level
///
/// # Arguments
/// * `default_level` - Default log level (debug, info, warn, error)
///
/// This can still be overridden by RUST_LOG environment variable.
/// Reqwest and its connection pool stay at `warn` unless RUST_LOG says otherwise.
pub fn init_with_level(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{},reqwest=warn,hyper=warn,rustls=warn",
            default_level
        ))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

/// Initialize logging for testing (captures logs for test output)
#[cfg(test)]
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(EnvFilter::new("debug"))
        .try_init();
}
