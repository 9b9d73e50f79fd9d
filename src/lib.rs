#![doc = r#"
s2ard — a Sentinel-2 analysis-ready-data processor.

This crate turns raw Sentinel-2 tile products (Level-1C top-of-atmosphere
or Level-2A bottom-of-atmosphere) into analysis-ready rasters:
band-subset, resampled, optionally cloud-masked, calibrated, reprojected,
stacked, and clipped GeoTIFFs, plus cross-tile mosaics and multi-date
averages. It powers the s2ard CLI and can be embedded in your own Rust
applications.

Requirements
------------
- GDAL development headers and runtime available on your system.
- The GDAL command-line utilities (`gdal_translate`, `gdalwarp`,
  `gdalbuildvrt`, `ogr2ogr`) on PATH; resampling, warping, mosaicking,
  and clipping are delegated to them.
- Sen2Cor (`L2A_Process`) and/or Fmask (`fmask_sentinel2Stacked.py`) on
  PATH when atmospheric correction or cloud classification is enabled.
- Rust 2024 edition toolchain.

Quick start: process one tile
-----------------------------
```rust,no_run
use std::path::Path;
use s2ard::config::JobConfig;
use s2ard::core::pipeline::{JobPaths, TileProcessor};

fn main() -> s2ard::Result<()> {
    let config = JobConfig::from_file(Path::new("config.yml"))?;
    let paths = JobPaths {
        data_dir: "/data".into(),
        work_dir: "/work".into(),
        output_dir: "/output".into(),
    };

    for tile in &config.images {
        TileProcessor::new(tile, &paths, None).run()?;
    }
    Ok(())
}
```

Aggregation
-----------
```rust,no_run
use std::path::Path;
use s2ard::core::aggregate;
use s2ard::types::ResamplingMethod;

fn main() -> s2ard::Result<()> {
    let images = vec![
        "S2A_MSIL1C_20200106T102421_N0208_R065_T32UNE_20200106T121050.SAFE".to_string(),
        "S2B_MSIL1C_20200111T102329_N0208_R065_T32UME_20200111T123123.SAFE".to_string(),
    ];
    aggregate::build_mosaic(
        Path::new("/output"),
        &images,
        Path::new("/output/mosaic"),
        ResamplingMethod::Cubic,
    )
}
```

Error handling
--------------
All public functions return `s2ard::Result<T>`; match on `s2ard::Error`
to handle specific cases, e.g. metadata or external-process failures.
Per-tile failures are isolated by the CLI runner: the tile is skipped
with a logged warning and the job continues, reporting the failure count
through its exit status.

Useful modules
--------------
- [`config`] — typed job configuration (YAML/JSON) with load-time validation.
- [`core`] — index kernels, masking, the per-tile pipeline, aggregation.
- [`io`] — Sentinel-2 band resolution and the GDAL raster/vector adapters.
- [`types`] — product, index, and resampling enums.
- [`error`] — crate-level `Error` and `Result`.
"#]

// Core modules (public)
pub mod config;
pub mod core;
pub mod error;
pub mod external;
pub mod io;
pub mod types;

// Curated public API surface
// Types
pub use error::{Error, Result};
pub use types::{ImageProperties, ProductType, ResamplingMethod, SpectralIndex};

// Configuration
pub use config::{
    ArdSettings, AverageSettings, CloudMaskSettings, JobConfig, MosaicSettings,
    OutputImageSettings, TileConfig,
};

// I/O adapters
pub use io::gdal::{RasterError, RasterMetadata};
pub use io::sentinel2::{BandPathMap, MetadataError, TileProduct};

// Pipeline entry points
pub use core::pipeline::{JobPaths, TileOutcome, TileProcessor};
