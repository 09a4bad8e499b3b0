//! Logging initialization and configuration.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the logging system with tracing.
///
/// This sets up tracing-subscriber with:
/// - Environment-based filtering (RUST_LOG)
/// - Pretty printing for development
///
/// Calling this more than once is a no-op; the first subscriber wins.
///
/// # Example
/// ```
/// ember_core::init_logging();
/// tracing::info!("Renderer initialized");
/// ```
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,ember=debug"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .try_init();
}
