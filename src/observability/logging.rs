//! Structured logging.
//!
//! # Responsibilities
//! - Install the global `tracing` subscriber once per process
//!
//! # Design Decisions
//! - `RUST_LOG` wins over the configured level when set
//! - `--debug` raises the crate's own events to debug regardless of config

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Build the filter directive for the configured level.
pub fn default_directive(level: &str, debug: bool) -> String {
    let level = if debug { "debug" } else { level };
    format!("p2pool_node={level},tower_http={level}")
}

/// Install the fmt subscriber. Safe to call more than once; later calls are
/// ignored.
pub fn init_tracing(level: &str, debug: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(level, debug)));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
