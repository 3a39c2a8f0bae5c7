//! Exposure application shell.
//!
//! Wires configuration, the database and the provider into [`AppState`] and
//! exposes the scan commands. Business logic lives in the `crates/`
//! directory.

pub mod commands;
pub mod error;
pub mod state;

pub use error::CommandError;
pub use state::AppState;

/// Application version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Initialize tracing subscriber for logging.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,exposure=debug"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(filter)
        .init();
}
