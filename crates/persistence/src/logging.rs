//! Process logging setup.

/// Installs a `tracing` subscriber for the persistence layer.
///
/// `RUST_LOG` wins when set; otherwise the crate logs at `level`. Calling this
/// more than once is harmless: later calls leave the first subscriber in place.
pub fn init_logging(level: &str) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("tessera_persistence={}", level)));

    let _ = tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .try_init();
}
