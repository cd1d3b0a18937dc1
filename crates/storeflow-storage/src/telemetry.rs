//! Logging setup
//!
//! The host owns stdout, so logs go to stderr without ANSI colors.

use tracing_subscriber::EnvFilter;

/// Install the global subscriber at `level` (e.g. "info", "debug")
///
/// `STOREFLOW_LOG` takes precedence when set, using the usual
/// `target=level` directive syntax. Calling this more than once is harmless.
pub fn init_tracing(level: &str) {
    let filter = std::env::var("STOREFLOW_LOG")
        .ok()
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(level));

    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_ansi(false)
        .try_init();
}
