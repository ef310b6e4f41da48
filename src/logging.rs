//! # Structured Logging
//!
//! Tracing subscriber setup shared by the worker binary and tests. Level
//! comes from `RUST_LOG` when set, otherwise from the configured default.

use std::sync::OnceLock;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize the global tracing subscriber.
///
/// Safe to call more than once; only the first call installs a subscriber,
/// so tests and the binary can both use it.
pub fn init_logging(default_level: &str) {
    let default_level = default_level.to_string();
    LOGGER_INITIALIZED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_level));

        let subscriber = tracing_subscriber::registry().with(
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_filter(filter),
        );

        // A subscriber may already be installed by an embedding test harness.
        if subscriber.try_init().is_err() {
            tracing::debug!("global tracing subscriber already initialized");
        }
    });
}
