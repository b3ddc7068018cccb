//! Global `tracing` logger setup for the node binary.
//!
//! + Prints enabled `tracing` events and spans to stdout.
//! + Default log level includes INFO, WARN, and ERROR events.
//! + Override the level or module filtering with `RUST_LOG`; see
//!   <https://docs.rs/tracing-subscriber/latest/tracing_subscriber/filter/struct.EnvFilter.html>.

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};

/// Initializes the global logger. Panics if one is already installed.
pub fn init() {
    try_init().expect("failed to set up logger");
}

/// Initializes the global logger for tests; a second call from another test
/// thread is tolerated rather than panicking.
pub fn init_for_testing() {
    if std::env::var_os("RUST_LOG").is_none() {
        return;
    }
    let _ = try_init();
}

pub fn try_init() -> Result<(), TryInitError> {
    let rust_log_filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|rust_log| Targets::from_str(&rust_log).ok())
        .unwrap_or_else(|| Targets::new().with_default(Level::INFO));

    let stdout_log = tracing_subscriber::fmt::layer()
        .compact()
        .with_level(true)
        .with_target(true)
        .with_ansi(true)
        .with_filter(rust_log_filter);

    tracing_subscriber::registry().with(stdout_log).try_init()
}
