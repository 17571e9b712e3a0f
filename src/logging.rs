use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::error::Error;
use crate::error::Result;

/// Install a global `tracing` subscriber printing to stderr.
///
/// The filter comes from `RUST_LOG`; `default_filter` is used when the variable is not set. Fails if a global
/// subscriber is installed already.
pub fn init_tracing(default_filter: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .map_err(|err| Error::Config(format!("tracing filter: {err}")))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .map_err(|err| Error::Config(format!("tracing: {err}")))?;

    info!("Tracing initialized");
    Ok(())
}
