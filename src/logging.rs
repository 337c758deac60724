//! Tracing initialization for hosts, examples, and test harnesses.
//!
//! The crate itself only emits `tracing` events (the logging contract:
//! leveled entries with a module-path source tag and timestamps); where
//! those entries go is the subscriber's concern. This module offers a
//! conventional setup — fmt layer plus `RUST_LOG`-style filtering — for
//! hosts that do not bring their own subscriber.

use anyhow::{anyhow, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing with an `info` default, honoring `RUST_LOG`.
pub fn init() -> Result<()> {
    init_with_filter("info")
}

/// Initialize tracing with the given default directive, honoring `RUST_LOG`
/// when set.
pub fn init_with_filter(default_directive: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))
        .map_err(|e| anyhow!("invalid filter directive: {e}"))?;
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init()
        .map_err(|e| anyhow!("failed to initialize tracing: {e}"))?;
    Ok(())
}
