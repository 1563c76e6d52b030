//! Shared tracing setup for GreenAfrica binaries.
//!
//! `RUST_LOG` wins when set; otherwise the default filter is used.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Default filter: gateway crates at debug, everything else at info
pub fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "debug"
    } else {
        "info,greenafrica=debug"
    }
}

/// Install the global subscriber.
///
/// Safe to call more than once; later calls are ignored.
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(verbose)));

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init();
}
