//! # ChatKit Bridge - command line entry point
//!
//! ## Initialization Sequence
//!
//! 1. **Tracing** - `RUST_LOG`-style filter, `info` by default, written to stderr
//! 2. **Configuration** - defaults, then `--config`, then `CHATKIT_*` variables
//! 3. **Command** - offline commands run directly; `fetch` and `stream`
//!    connect an in-process host/frame pair first
//!
//! ## Shutdown
//!
//! Ctrl+C during `fetch` or `stream` aborts the proxied request across the
//! boundary and waits for the host to settle it before exiting.

#![forbid(unsafe_code)]
#![forbid(clippy::unwrap_used)]
#![forbid(clippy::panic)]
#![deny(clippy::expect_used)]

use std::time::Instant;

use anyhow::Result;
use clap::Parser;
use tracing::debug;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use chatkit_bridge::cli::Cli;
use chatkit_bridge::commands::execute_command;

#[tokio::main]
async fn main() -> Result<()> {
    let start_time = Instant::now();
    init_tracing();

    let cli = Cli::parse();
    debug!(command = ?cli.command, "Starting");

    execute_command(cli).await?;

    debug!(elapsed = ?start_time.elapsed(), "Done");
    Ok(())
}

/// Initialize tracing subscriber with environment filter.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
