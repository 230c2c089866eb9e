//! Tracing setup shared by the collector binary and its tests.
//!
//! A scoped-down rolling/gzip file appender: this
//! workspace logs to stdout only, with level controlled by `RUST_LOG`
//! (default `info`). A persistent-log sink is a natural extension point
//! but isn't needed at this crate's scale.

use tracing_subscriber::{fmt, EnvFilter};

/// Installs the global tracing subscriber. Safe to call once at process
/// start; a second call is a no-op rather than a panic, so test harnesses
/// can call it from every test without coordinating.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
