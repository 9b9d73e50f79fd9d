//! External tool invocation: Sen2Cor, Fmask, and the GDAL command-line
//! utilities the pipeline delegates resampling, warping, and mosaicking to.
//! Every call is blocking; a non-zero exit status is a reportable failure.
use std::path::Path;
use std::process::Command;
use tracing::info;

use crate::error::{Error, Result};

/// Run an external tool, logging the full command line. A non-zero exit
/// status (or a missing exit code after a signal) becomes an
/// `ExternalProcess` error.
pub fn run_command(tool: &str, args: &[&str]) -> Result<()> {
    info!("{} {}", tool, args.join(" "));
    let status = Command::new(tool).args(args).status()?;
    if !status.success() {
        return Err(Error::ExternalProcess {
            tool: tool.to_string(),
            status: status.code().unwrap_or(-1),
        });
    }
    Ok(())
}

/// Full Sen2Cor atmospheric correction of an L1C product. Produces a new
/// L2A product directory next to the input.
pub fn atmospheric_correction(input_tile: &Path) -> Result<()> {
    let tile = input_tile.to_string_lossy();
    run_command("L2A_Process", &["--resolution", "10", tile.as_ref()])
}

/// Sen2Cor scene-classification-only run; emits an L2A product carrying
/// just the SCL raster.
pub fn scene_classification(input_tile: &Path) -> Result<()> {
    let tile = input_tile.to_string_lossy();
    run_command("L2A_Process", &["--sc_only", tile.as_ref()])
}

/// Fmask cloud classification over a SAFE directory, writing a single
/// classification raster to `output`.
pub fn fmask_classification(input_tile: &Path, output: &Path) -> Result<()> {
    let tile = input_tile.to_string_lossy();
    let out = output.to_string_lossy();
    run_command(
        "fmask_sentinel2Stacked.py",
        &["-o", out.as_ref(), "--safedir", tile.as_ref()],
    )
}
