//! Media Reconciler command-line entry point.

mod cli;

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Log targets used by the library besides its module paths.
const LOG_TARGETS: &[&str] = &["pipeline", "reconcile", "migration", "verify", "hasher"];

fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    // Initialize logging
    let mut filter = EnvFilter::from_default_env().add_directive("media_reconciler=info".parse()?);
    for target in LOG_TARGETS {
        filter = filter.add_directive(format!("{target}=info").parse()?);
    }
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(filter)
        .init();

    cli::run_command(&args)
}
