//! provides logging helpers

use std::io::IsTerminal;

use anyhow::{Context, Result};
use tracing_subscriber::{filter, fmt::layer, prelude::*, registry};

pub use tracing::{debug, error, error_span, info, trace, warn, warn_span, Span};

/// initiate the global tracing subscriber
pub fn init() -> Result<()> {
    let env_filter = filter::EnvFilter::builder()
        .with_default_directive(filter::LevelFilter::INFO.into())
        .from_env()
        .context("invalid env filter")?
        .add_directive("rocksdb=warn".parse()?);

    let fmt_layer = layer()
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(true)
        .with_filter(env_filter);

    registry().with(fmt_layer).init();

    Ok(())
}
