//! s2ard CLI entrypoint.
//!
//! Provides a thin wrapper over the `cli` module: parse args, run the
//! configured job, and exit with a non-zero status when the job (or any
//! tile in it) failed. For programmatic use, prefer the library API.

use clap::Parser;

mod cli;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = cli::CliArgs::parse();
    cli::run(args)?;
    Ok(())
}
