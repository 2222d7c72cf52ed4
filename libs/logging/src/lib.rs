//! Tracing setup shared by the bridge binary and its tests.

use anyhow::{Context as _, Result};
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::util::SubscriberInitExt as _;

/// Registers a global subscriber that logs to stdout.
///
/// `directives` extends the opinionated default filter; an empty string keeps
/// the defaults. `RUST_LOG` style syntax.
pub fn setup_global_subscriber(directives: &str) -> Result<()> {
    let filter = try_filter(directives).context("Failed to parse log directives")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Could not set global default: {e}"))?;

    Ok(())
}

/// Constructs an [`EnvFilter`] with some noisy crates already silenced.
pub fn try_filter(directives: &str) -> Result<EnvFilter, ParseError> {
    /// A filter directive that keeps a catch-all like `debug` useful.
    const IRRELEVANT_CRATES: &str = "hyper=info,tower=info,mio_serial=info";

    if directives.is_empty() {
        EnvFilter::try_new(format!("{IRRELEVANT_CRATES},info"))
    } else {
        EnvFilter::try_new(format!("{IRRELEVANT_CRATES},{directives}"))
    }
}

/// Initialises a logger to be used in tests.
pub fn test(directives: &str) -> DefaultGuard {
    tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(directives)
        .set_default()
}
