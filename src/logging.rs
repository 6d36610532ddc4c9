//! Logging configuration using tracing
//!
//! Structured logging to stderr, filtered through RUST_LOG.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the tracing subscriber
///
/// `default_level` applies when RUST_LOG is unset, e.g.:
/// - `RUST_LOG=kanban_sync=debug` - Debug output for the engine only
/// - `RUST_LOG=kanban_sync::sync=trace,info` - Trace passes, info elsewhere
///
/// # Errors
/// Returns an error if the subscriber has already been initialized
pub fn init_with_level(default_level: &str) -> crate::Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_line_number(true)
                .with_writer(std::io::stderr)
                .pretty(),
        )
        .try_init()
        .map_err(|e| {
            crate::KanbanSyncError::Other(format!("Failed to initialize tracing: {}", e))
        })?;

    Ok(())
}

/// Initialize the tracing subscriber with a quiet "warn" default
pub fn init() -> crate::Result<()> {
    init_with_level("warn")
}

/// Initialize logging for tests (no-op if already initialized)
pub fn init_test() {
    let _ = init();
}
