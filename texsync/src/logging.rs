//! Tracing setup for the `texsync` binary.
//!
//! Library code only uses the `tracing` macros; installing a subscriber is the
//! caller's job. Control verbosity with `RUST_LOG`, e.g.
//! `RUST_LOG=texsync::sync=debug texsync sync`.

pub use tracing::{debug, error, info, warn};

/// Installs a stderr `fmt` subscriber filtered by `RUST_LOG` (default `info`).
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}
