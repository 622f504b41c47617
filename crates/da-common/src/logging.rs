//! Shared `tracing` initialization.
//!
//! Diagnostics go to stderr so the run's output file stays a pure data
//! sink. Defaults to `info`, overridable via `RUST_LOG`.

use tracing_subscriber::EnvFilter;

/// Install the global subscriber. Safe to call once per process; a second
/// call is a no-op (the underlying `try_init` swallows the "already set"
/// error, since tests may call this from multiple modules).
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
