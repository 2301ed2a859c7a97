//! Log output setup.

use tracing_subscriber::EnvFilter;

/// Install a formatted stderr subscriber.
///
/// `RUST_LOG` wins over `default_filter` when set. Returns `false` if a global
/// subscriber was already installed, which makes repeated calls harmless.
pub fn init_tracing(default_filter: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}
