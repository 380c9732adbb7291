//! Tracing initialization for binaries and test harnesses embedding the crate.
//!
//! The data access layer only emits `tracing` events and spans; it never installs a subscriber
//! itself. Call [`init_telemetry`] once at startup to print them to the console. Filtering follows
//! `RUST_LOG` (e.g. `RUST_LOG=pgdal=debug` to see every statement and transaction step), and
//! defaults to `info` with sqlx limited to warnings so slow statements still show up.

use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const DEFAULT_FILTER: &str = "info,sqlx=warn";

/// Install a global fmt subscriber filtered by `RUST_LOG`.
///
/// Fails if a global subscriber is already set.
pub fn init_telemetry() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    info!("Telemetry initialized");
    Ok(())
}
