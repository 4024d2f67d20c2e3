//! Logging initialization.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "shell_bridge=info";

/// Build the filter: `RUST_LOG` if set, otherwise `shell_bridge=<level>`.
fn filter_for(level: Option<&str>) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| match level {
        Some(level) if !level.is_empty() => EnvFilter::new(format!("shell_bridge={level}")),
        _ => EnvFilter::new(DEFAULT_FILTER),
    })
}

/// Initialize the logging system with the default level.
///
/// # Panics
///
/// Panics if a global tracing subscriber has already been set.
pub fn init() {
    init_with_level(None);
}

/// Initialize the logging system, using `level` when `RUST_LOG` is unset.
///
/// # Panics
///
/// Panics if a global tracing subscriber has already been set.
pub fn init_with_level(level: Option<&str>) {
    tracing_subscriber::registry()
        .with(filter_for(level))
        .with(tracing_subscriber::fmt::layer().compact())
        .init();
}

/// Try to initialize the logging system.
///
/// Returns `Err` if logging has already been initialized.
pub fn try_init() -> Result<(), tracing_subscriber::util::TryInitError> {
    tracing_subscriber::registry()
        .with(filter_for(None))
        .with(tracing_subscriber::fmt::layer().compact())
        .try_init()
}
