//! # retina - command-line driver for the retina simulator
//!
//! Runs retina experiments described in TOML, writes multimeter results as
//! plain-text columns and reports a JSON summary.

use clap::Parser;
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use retina_cli::RetinaCli;

fn main() {
    // Parse CLI arguments
    let cli = RetinaCli::parse();

    // Initialize logging with environment variable support
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();

    // Execute the command
    if let Err(err) = cli.execute() {
        error!("Command failed: {}", err);
        std::process::exit(1);
    }
}
