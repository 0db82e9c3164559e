//! Tracing setup for binaries embedding the outbox.
//!
//! Log filtering follows `RUST_LOG`, defaulting to `info`. Metrics are emitted through
//! the `metrics` facade when the `telemetry` feature is on; installing a recorder is
//! left to the embedding process.
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Install the global fmt subscriber. Safe to call more than once; later calls are
/// ignored.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer();
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}
