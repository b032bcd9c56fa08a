//! Tracing initialization
//!
//! Structured logging via `tracing`, filtered by `RUST_LOG` (default
//! `info`). Settlement operations log at info with entity ids as fields so
//! a single withdrawal or escrow can be followed through the log.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}
