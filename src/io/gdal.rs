use gdal::raster::{Buffer, GdalDataType, GdalType};
use gdal::{Dataset, DriverManager, Metadata};
use ndarray::Array2;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::external::run_command;
use crate::types::ImageProperties;

/// Errors encountered in the raster adapter
#[derive(Debug, Error)]
pub enum RasterError {
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unsupported raster: {0}")]
    Unsupported(String),
    #[error("array shape {rows}x{cols} does not match declared raster size {height}x{width}")]
    ShapeMismatch {
        rows: usize,
        cols: usize,
        height: usize,
        width: usize,
    },
    #[error("band count mismatch: {arrays} arrays for {bands} declared bands")]
    BandCountMismatch { arrays: usize, bands: usize },
}

/// Metadata extracted from a GDAL-supported raster. `nodata` is fixed at
/// 0 by policy, overriding whatever the source file declares.
#[derive(Debug, Clone)]
pub struct RasterMetadata {
    /// Number of raster bands
    pub band_count: usize,
    /// Affine geotransform coefficients ([origin_x, pixel_width, rot_x, origin_y, rot_y, pixel_height])
    pub geotransform: [f64; 6],
    /// Projection in WKT format
    pub projection: String,
    /// EPSG code parsed from the projection authority tag, if any
    pub epsg: Option<u32>,
    /// Width (pixels) of the raster
    pub width: usize,
    /// Height (lines) of the raster
    pub height: usize,
    /// Pixel data type of the first band
    pub dtype: GdalDataType,
    /// Always 0
    pub nodata: f64,
}

impl RasterMetadata {
    /// Pixel width in CRS units.
    pub fn pixel_size(&self) -> f64 {
        self.geotransform[1]
    }
}

// Helper to extract the EPSG code from a WKT authority tag
pub(crate) fn parse_epsg(wkt: &str) -> Option<u32> {
    const KEY: &str = "AUTHORITY[\"EPSG\",\"";
    let idx = wkt.rfind(KEY)?;
    let start = idx + KEY.len();
    let end = wkt[start..].find('"')?;
    wkt[start..start + end].parse().ok()
}

/// Open a raster and read its full metadata record.
pub fn read_metadata<P: AsRef<Path>>(path: P) -> Result<RasterMetadata, RasterError> {
    let dataset = Dataset::open(path.as_ref())?;
    let (size_x, size_y) = dataset.raster_size();
    let band_count = dataset.raster_count() as usize;
    if band_count == 0 {
        return Err(RasterError::Unsupported("no raster bands found".into()));
    }
    let geotransform = match dataset.geo_transform() {
        Ok(gt) => gt,
        Err(_) => [0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
    };
    let projection = dataset.projection();
    let epsg = parse_epsg(&projection);
    let dtype = dataset.rasterband(1)?.band_type();
    Ok(RasterMetadata {
        band_count,
        geotransform,
        projection,
        epsg,
        width: size_x as usize,
        height: size_y as usize,
        dtype,
        nodata: 0.0,
    })
}

/// Read a single band (1-based index) as an f64 ndarray of shape (height, width)
pub fn read_band<P: AsRef<Path>>(path: P, index: usize) -> Result<Array2<f64>, RasterError> {
    let dataset = Dataset::open(path.as_ref())?;
    let (size_x, size_y) = dataset.raster_size();
    if index == 0 || index > dataset.raster_count() as usize {
        return Err(RasterError::Unsupported(format!(
            "band index {} out of range",
            index
        )));
    }
    let band = dataset.rasterband(index)?;
    let window = (size_x, size_y);
    let buf = band.read_as::<f64>((0, 0), window, window, None)?;
    let array = Array2::from_shape_vec((size_y as usize, size_x as usize), buf.data().to_vec())
        .map_err(|_| RasterError::ShapeMismatch {
            rows: size_y as usize,
            cols: size_x as usize,
            height: size_y as usize,
            width: size_x as usize,
        })?;
    Ok(array)
}

/// Write a raster from arrays plus a metadata record. Array dimensions
/// must match the declared size and the array count the declared band
/// count; nodata is set to 0 on every band regardless of the source.
pub fn write_image<P: AsRef<Path>>(
    path: P,
    driver: &str,
    meta: &RasterMetadata,
    arrays: &[Array2<f64>],
) -> Result<(), RasterError> {
    if arrays.len() != meta.band_count {
        return Err(RasterError::BandCountMismatch {
            arrays: arrays.len(),
            bands: meta.band_count,
        });
    }
    for array in arrays {
        if array.nrows() != meta.height || array.ncols() != meta.width {
            return Err(RasterError::ShapeMismatch {
                rows: array.nrows(),
                cols: array.ncols(),
                height: meta.height,
                width: meta.width,
            });
        }
    }
    match meta.dtype {
        GdalDataType::UInt8 => write_typed::<u8, _>(path.as_ref(), driver, meta, arrays, |v| v as u8),
        GdalDataType::UInt16 => {
            write_typed::<u16, _>(path.as_ref(), driver, meta, arrays, |v| v as u16)
        }
        GdalDataType::Int16 => {
            write_typed::<i16, _>(path.as_ref(), driver, meta, arrays, |v| v as i16)
        }
        GdalDataType::UInt32 => {
            write_typed::<u32, _>(path.as_ref(), driver, meta, arrays, |v| v as u32)
        }
        GdalDataType::Int32 => {
            write_typed::<i32, _>(path.as_ref(), driver, meta, arrays, |v| v as i32)
        }
        GdalDataType::Float32 => {
            write_typed::<f32, _>(path.as_ref(), driver, meta, arrays, |v| v as f32)
        }
        GdalDataType::Float64 => write_typed::<f64, _>(path.as_ref(), driver, meta, arrays, |v| v),
        other => Err(RasterError::Unsupported(format!(
            "pixel type {:?} not writable",
            other
        ))),
    }
}

fn write_typed<T, F>(
    path: &Path,
    driver: &str,
    meta: &RasterMetadata,
    arrays: &[Array2<f64>],
    cast: F,
) -> Result<(), RasterError>
where
    T: GdalType + Copy,
    F: Fn(f64) -> T,
{
    let driver = DriverManager::get_driver_by_name(driver)?;
    let mut ds =
        driver.create_with_band_type::<T, _>(path, meta.width, meta.height, arrays.len())?;
    ds.set_geo_transform(&meta.geotransform)?;
    if !meta.projection.is_empty() {
        ds.set_projection(&meta.projection)?;
    }
    ds.set_metadata_item("AREA_OR_POINT", "Area", "")?;
    for (i, array) in arrays.iter().enumerate() {
        let data: Vec<T> = array.iter().map(|&v| cast(v)).collect();
        let mut buf = Buffer::new((meta.width, meta.height), data);
        let mut band = ds.rasterband(i + 1)?;
        band.write((0, 0), (meta.width, meta.height), &mut buf)?;
        band.set_no_data_value(Some(0.0))?;
    }
    Ok(())
}

/// Resample a raster to the target resolution with `gdal_translate`.
pub fn resample_image(
    image: &Path,
    resampled: &Path,
    props: &ImageProperties,
) -> crate::error::Result<PathBuf> {
    let res = props.resolution.to_string();
    let src = image.to_string_lossy();
    let dst = resampled.to_string_lossy();
    run_command(
        "gdal_translate",
        &[
            "-tr",
            &res,
            &res,
            "-r",
            props.resampling_method.as_gdal_str(),
            src.as_ref(),
            dst.as_ref(),
        ],
    )?;
    Ok(resampled.to_path_buf())
}

/// Reproject a raster to the target CRS and resolution with `gdalwarp`.
pub fn warp_image(
    image: &Path,
    warped: &Path,
    props: &ImageProperties,
) -> crate::error::Result<PathBuf> {
    let res = props.resolution.to_string();
    let t_srs = format!("EPSG:{}", props.t_srs);
    let src = image.to_string_lossy();
    let dst = warped.to_string_lossy();
    run_command(
        "gdalwarp",
        &[
            "-tr",
            &res,
            &res,
            "-t_srs",
            &t_srs,
            "-r",
            props.resampling_method.as_gdal_str(),
            src.as_ref(),
            dst.as_ref(),
            "-overwrite",
        ],
    )?;
    Ok(warped.to_path_buf())
}

/// Crop a raster to one polygon of a cutline feature collection.
pub fn crop_to_feature(
    image: &Path,
    output: &Path,
    cutline: &Path,
    fid: u64,
) -> crate::error::Result<()> {
    let src = image.to_string_lossy();
    let dst = output.to_string_lossy();
    let cut = cutline.to_string_lossy();
    let selector = format!("FID = {}", fid);
    run_command(
        "gdalwarp",
        &[
            "-cutline",
            cut.as_ref(),
            "-cwhere",
            &selector,
            "-crop_to_cutline",
            src.as_ref(),
            dst.as_ref(),
            "-overwrite",
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epsg_from_wkt_authority_tag() {
        let wkt = r#"PROJCS["WGS 84 / UTM zone 32N",GEOGCS["WGS 84",AUTHORITY["EPSG","4326"]],AUTHORITY["EPSG","32632"]]"#;
        assert_eq!(parse_epsg(wkt), Some(32632));
    }

    #[test]
    fn epsg_missing_authority() {
        assert_eq!(parse_epsg("LOCAL_CS[\"arbitrary\"]"), None);
        assert_eq!(parse_epsg(""), None);
    }
}
