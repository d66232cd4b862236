//! Logging configuration using tracing
//!
//! Structured logging to stderr, filtered through the RUST_LOG environment
//! variable.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the tracing subscriber
///
/// Respects RUST_LOG, defaulting to "warn" so normal CLI output stays quiet.
///
/// # Example RUST_LOG values
/// - `RUST_LOG=info` - Show info and above
/// - `RUST_LOG=refinery=debug` - Debug level for this crate only
/// - `RUST_LOG=refinery=debug,gitcmd=trace` - Different levels per crate
///
/// # Errors
/// Returns an error if a subscriber has already been initialized
pub fn init() -> crate::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .try_init()
        .map_err(|e| crate::RefineryError::Other(format!("Failed to initialize tracing: {}", e)))?;

    Ok(())
}

/// Initialize logging for tests (no-op if already initialized)
pub fn init_test() {
    let _ = init();
}
