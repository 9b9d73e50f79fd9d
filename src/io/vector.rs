use gdal::Dataset;
use gdal::vector::LayerAccess;
use std::path::{Path, PathBuf};

use crate::external::run_command;
use crate::io::gdal::{RasterError, parse_epsg};

/// EPSG code of the first layer of a feature collection, if declared.
pub fn vector_epsg(path: &Path) -> Result<Option<u32>, RasterError> {
    let dataset = Dataset::open(path)?;
    let layer = dataset.layer(0)?;
    let srs = match layer.spatial_ref() {
        Some(srs) => srs,
        None => return Ok(None),
    };
    let wkt = srs.to_wkt()?;
    Ok(parse_epsg(&wkt))
}

/// Stable feature IDs of the first layer, in layer order.
pub fn feature_ids(path: &Path) -> Result<Vec<u64>, RasterError> {
    let dataset = Dataset::open(path)?;
    let mut layer = dataset.layer(0)?;
    let mut ids = Vec::new();
    for feature in layer.features() {
        if let Some(fid) = feature.fid() {
            ids.push(fid);
        }
    }
    Ok(ids)
}

/// Reproject a whole feature collection to the target EPSG with `ogr2ogr`.
pub fn reproject_features(
    source: &Path,
    destination: &Path,
    epsg: u32,
) -> crate::error::Result<PathBuf> {
    let t_srs = format!("EPSG:{}", epsg);
    let src = source.to_string_lossy();
    let dst = destination.to_string_lossy();
    run_command(
        "ogr2ogr",
        &["-t_srs", &t_srs, "-f", "GeoJSON", dst.as_ref(), src.as_ref()],
    )?;
    Ok(destination.to_path_buf())
}
