//! # Logging
//!
//! `tracing` subscriber setup for binaries and tests.
//!
//! `RUST_LOG` wins over the configured filter, e.g.
//! `RUST_LOG=cmms_service=trace,sqlx=info`.

use tracing_subscriber::{fmt, EnvFilter};

/// Installs the global fmt subscriber. A second call is a no-op.
///
/// ```no_run
/// use cmms_service::{config::CmmsConfig, logging};
///
/// let config = CmmsConfig::load_or_default(None);
/// logging::init_tracing(&config.logging.filter);
/// ```
pub fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_line_number(true)
        .try_init();
}

/// Debug-level subscriber writing through the test harness.
pub fn init_test_tracing() {
    let _ = fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}
