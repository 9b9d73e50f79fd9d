use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "s2ard", version, about = "Sentinel-2 Analysis Ready Data")]
pub struct CliArgs {
    /// Directory containing Sentinel-2 .SAFE product directories
    #[arg(short, long)]
    pub tiles: PathBuf,

    /// Job configuration file (YAML, or JSON by extension)
    #[arg(short, long, default_value = "config.yml")]
    pub config: PathBuf,

    /// Area-of-interest feature collection (GeoJSON) used for clipping
    #[arg(long)]
    pub aoi: Option<PathBuf>,

    /// Scratch directory for intermediate rasters
    #[arg(long, default_value = "/work")]
    pub work_dir: PathBuf,

    /// Directory for final per-tile products and aggregates
    #[arg(long, default_value = "/output")]
    pub output_dir: PathBuf,

    /// Enable logging
    #[arg(long, default_value_t = false)]
    pub log: bool,
}
