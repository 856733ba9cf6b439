//! `tilebundle` binary entry point.
//!
//! Thin wrapper around the tilebundle-cli library: parse arguments,
//! initialize logging, run the selected command against stdout.

use anyhow::Result;
use clap::Parser;
use tilebundle_cli::{Cli, run};

fn main() -> Result<()> {
    // Logs go to stderr so tile bytes on stdout stay clean
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    tracing::debug!("Parsed arguments: {cli:?}");

    let stdout = std::io::stdout();
    run(&cli, &mut stdout.lock())
}
