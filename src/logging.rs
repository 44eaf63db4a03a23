//! Logging configuration
//!
//! Structured logging with tracing. The default filter keeps third
//! party crates quiet; `RUST_LOG` overrides everything.

use tracing_subscriber::fmt;
use tracing_subscriber::EnvFilter;

/// Initialize logging.
///
/// `verbose` lowers the crate filter to DEBUG unless `RUST_LOG` is set.
pub fn init(verbose: bool) {
    let default = if verbose {
        "oniondrop=debug"
    } else {
        "oniondrop=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .init();
}
