//! Command Line Interface (CLI) layer for s2ard.
//!
//! This module defines argument parsing (`args`) and the orchestration
//! logic (`runner`) that loads the job configuration, runs the per-tile
//! pipeline sequentially with per-tile failure isolation, and dispatches
//! the mosaic and averaging stages afterwards.
//!
//! If you are embedding s2ard into another application, prefer driving
//! the library modules (`s2ard::core`, `s2ard::io`) directly.
pub mod args;
pub mod runner;

pub use args::CliArgs;
pub use runner::run;
