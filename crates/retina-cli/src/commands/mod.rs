//! CLI command implementations for the retina simulator

use clap::{Parser, Subcommand};
use crate::error::CliResult;

pub mod check;
pub mod run;

/// retina - biophysically inspired retina simulator
#[derive(Parser, Debug)]
#[command(
    name = "retina",
    version,
    about = "Biophysically inspired retina simulator",
    long_about = "Simulates a retina described as a graph of per-pixel modules \
                  (temporal filters, nonlinearities, Gaussian filters, compartments, \
                  plasticity) driven by impulse, white-noise, sequence or grating input, \
                  and records module outputs with multimeters."
)]
pub struct RetinaCli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run an experiment and write its results
    #[command(alias = "simulate")]
    Run(run::RunCommand),

    /// Build an experiment and report its evaluation order
    Check(check::CheckCommand),
}

impl RetinaCli {
    /// Execute the CLI command
    pub fn execute(self) -> CliResult<()> {
        match self.command {
            Commands::Run(cmd) => cmd.execute(),
            Commands::Check(cmd) => cmd.execute(),
        }
    }
}
