//! Logging setup.

use tracing_subscriber::EnvFilter;

/// Installs a `tracing` subscriber that writes to stdout.
///
/// The filter comes from `RUST_LOG` (for example
/// `RUST_LOG=geobattle=debug,geobattle_session=debug`) and defaults to
/// `info`. Calling this twice is harmless: the second call leaves the first
/// subscriber in place.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
