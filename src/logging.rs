//! Diagnostic logging for the library and the monitor binary.
//!
//! Everything in the crate logs through `tracing` macros. This module only
//! installs the subscriber; the library never does so on its own.

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset, indexed by `-v` count.
fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "deviot_lib=warn,deviot_monitor=info",
        1 => "deviot_lib=info,deviot_monitor=info",
        2 => "deviot_lib=debug,deviot_monitor=debug",
        _ => "trace",
    }
}

/// Install a stderr `fmt` subscriber. `RUST_LOG` wins over `verbosity`.
///
/// Calling it twice is harmless: the second subscriber is rejected and the
/// first one stays in place.
pub fn init(verbosity: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
