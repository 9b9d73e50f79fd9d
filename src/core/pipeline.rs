//! Per-tile analysis-ready-data pipeline.
//!
//! Stages run in a fixed order: band discovery, optional atmospheric
//! correction, target-CRS resolution, resampling, index derivation,
//! cloud masking (scene-classification codes and/or Fmask), calibration,
//! reprojection, stacking, materialization, and clipping. Each stage
//! consumes a band map and returns a new one, so the data dependencies
//! between stages stay explicit.
use ndarray::Array2;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::TileConfig;
use crate::core::{aggregate, indices, mask};
use crate::error::{Error, Result};
use crate::external;
use crate::io::gdal::{self as raster};
use crate::io::sentinel2::{self, BandPathMap, SCL_BAND, TileProduct};
use crate::types::{ImageProperties, ProductType, REFLECTANCE_SCALE, ResamplingMethod, SpectralIndex};
use gdal::raster::GdalDataType;

/// Directories a job reads from and writes to, threaded explicitly
/// through every stage.
#[derive(Debug, Clone)]
pub struct JobPaths {
    /// Directory holding the input `.SAFE` products.
    pub data_dir: PathBuf,
    /// Scratch area for intermediate rasters.
    pub work_dir: PathBuf,
    /// Final product area; each tile gets its own subdirectory.
    pub output_dir: PathBuf,
}

impl JobPaths {
    /// Work-area path assembled from underscore-joined tokens.
    fn work_path(&self, tokens: &[&str]) -> PathBuf {
        self.work_dir.join(format!("{}.tif", tokens.join("_")))
    }
}

/// Outcome of one tile run. `final_name` differs from the configured
/// identifier when atmospheric correction promoted an L1C input to a
/// newly generated L2A product.
#[derive(Debug)]
pub struct TileOutcome {
    pub final_name: String,
}

/// Runs the full per-tile transformation.
pub struct TileProcessor<'a> {
    config: &'a TileConfig,
    paths: &'a JobPaths,
    features: Option<&'a Path>,
}

fn stem_of(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "band".into())
}

impl<'a> TileProcessor<'a> {
    pub fn new(config: &'a TileConfig, paths: &'a JobPaths, features: Option<&'a Path>) -> Self {
        TileProcessor {
            config,
            paths,
            features,
        }
    }

    /// Run every configured stage for this tile.
    pub fn run(&self) -> Result<TileOutcome> {
        let input_tile = TileProduct::open(&self.paths.data_dir.join(&self.config.tile))?;
        let mut tile = input_tile.clone();

        info!(
            "processing {} ({} product)",
            tile.name, tile.product_type
        );

        // band discovery
        let mut all_bands = tile.resolve_all_bands()?;
        let mut ref_bands =
            sentinel2::subset_bands(&self.config.output.bands, &all_bands, tile.product_type);
        sentinel2::require_bands(&self.config.output.bands, &ref_bands)?;

        // atmospheric correction promotes the L1C input to a new L2A product
        if self.config.ard.atm_corr && tile.product_type == ProductType::L1C {
            info!("running atmospheric correction (Sen2Cor)");
            external::atmospheric_correction(&input_tile.dir)?;
            tile = sentinel2::find_l2a_sibling(&self.paths.data_dir, &input_tile.name)?;
            all_bands = tile.resolve_all_bands()?;
            ref_bands =
                sentinel2::subset_bands(&self.config.output.bands, &all_bands, tile.product_type);
            sentinel2::require_bands(&self.config.output.bands, &ref_bands)?;
        }

        // the output directory carries the (possibly renamed) product name
        let tile_output_dir = self.paths.output_dir.join(tile.stem());
        fs::create_dir_all(&tile_output_dir)?;

        // an unset target CRS adopts the tile's native CRS
        let t_srs = match self.config.output.t_srs {
            Some(code) => code,
            None => {
                let (band, path) = ref_bands
                    .iter()
                    .next()
                    .ok_or_else(|| Error::Processing("no bands resolved".into()))?;
                raster::read_metadata(path)?.epsg.ok_or_else(|| {
                    Error::Processing(format!("band {} declares no EPSG code", band))
                })?
            }
        };
        let props = ImageProperties {
            resolution: self.config.output.resolution,
            t_srs,
            resampling_method: self.config.output.resampling_method,
        };

        // resampling to target resolution
        let mut ref_bands = self.resample_stage(&tile, ref_bands, &props)?;

        // derived indices
        let mut derived_bands = BandPathMap::new();
        if self.config.ard.derived_index {
            for &index in self.config.output.vi.as_deref().unwrap_or_default() {
                match self.derive_index(&tile, index, &all_bands, &props) {
                    Ok(path) => {
                        derived_bands.insert(index.key().to_string(), path);
                    }
                    // a bad index leaves the rest of the tile intact
                    Err(e @ Error::DimensionMismatch { .. }) => {
                        warn!("skipping index {}: {}", index, e);
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        // scene-classification cloud masking
        if self.config.ard.cloud_mask {
            if let Some(codes) = self.config.cloud_mask.sen2cor_scl_codes.clone() {
                let scl_mask = self.build_scl_mask(&input_tile, &tile, &codes, &props)?;
                info!("applying scene classification mask");
                ref_bands = self.mask_stage(ref_bands, &scl_mask, "scl")?;
                derived_bands = self.mask_stage(derived_bands, &scl_mask, "scl")?;
            }
        }

        // Fmask cloud masking; the classifier consumes the original L1C input
        if self.config.ard.cloud_mask && input_tile.product_type == ProductType::L1C {
            if let Some(codes) = self.config.cloud_mask.fmask_codes.clone() {
                let fmask_mask =
                    self.build_fmask_mask(&input_tile, &tile_output_dir, &codes, &props)?;
                info!("applying Fmask cloud mask");
                ref_bands = self.mask_stage(ref_bands, &fmask_mask, "fmask")?;
                derived_bands = self.mask_stage(derived_bands, &fmask_mask, "fmask")?;
            }
        }

        // calibration to reflectance fractions
        if self.config.ard.calibrate {
            ref_bands = self.calibrate_stage(ref_bands)?;
        }

        // reprojection of everything still off the target CRS
        ref_bands = self.reproject_stage(ref_bands, &props)?;
        derived_bands = self.reproject_stage(derived_bands, &props)?;

        // stacking collapses the reflectance bands into one raster
        if self.config.ard.stack && self.config.output.bands.len() > 1 {
            ref_bands = self.stack_stage(&tile, &ref_bands)?;
        }

        // indices ride along unstacked
        ref_bands.extend(derived_bands);

        // materialization into the tile's output directory
        for (key, path) in &ref_bands {
            let output = tile_output_dir.join(format!("{}_{}.tif", tile.stem(), key));
            info!("writing output {:?}", output);
            fs::copy(path, &output)?;
        }

        // clipping to the job AOI
        if self.config.ard.clip {
            let features = self.features.ok_or_else(|| {
                Error::Config("clip requested but no input features supplied".into())
            })?;
            aggregate::crop_to_cutline(&tile_output_dir, features)?;
        }

        Ok(TileOutcome {
            final_name: tile.name.clone(),
        })
    }

    /// Resample every band whose pixel size differs from the target
    /// resolution. The comparison is exact; a band already at target
    /// resolution passes through untouched.
    fn resample_stage(
        &self,
        tile: &TileProduct,
        bands: BandPathMap,
        props: &ImageProperties,
    ) -> Result<BandPathMap> {
        let mut resampled = BandPathMap::new();
        for (key, path) in bands {
            let meta = raster::read_metadata(&path)?;
            if meta.pixel_size() != props.resolution {
                info!("resampling band {} to target resolution", key);
                let destination = self.paths.work_path(&[tile.stem(), &key]);
                resampled.insert(key, raster::resample_image(&path, &destination, props)?);
            } else {
                resampled.insert(key, path);
            }
        }
        Ok(resampled)
    }

    /// Resolve, resample, and compute one spectral index, writing it as a
    /// single-band Float32 raster in the work area.
    fn derive_index(
        &self,
        tile: &TileProduct,
        index: SpectralIndex,
        all_bands: &BandPathMap,
        props: &ImageProperties,
    ) -> Result<PathBuf> {
        info!("deriving index {}", index);
        let required: Vec<String> = index
            .required_bands()
            .iter()
            .map(|band| band.to_string())
            .collect();
        let vi_bands = sentinel2::subset_bands(&required, all_bands, tile.product_type);
        sentinel2::require_bands(&required, &vi_bands)?;
        let vi_bands = self.resample_stage(tile, vi_bands, props)?;

        let mut arrays = Vec::with_capacity(required.len());
        for band in &required {
            arrays.push(raster::read_band(&vi_bands[band], 1)?);
        }
        let data = indices::compute_index(index, &arrays)?;

        let mut meta = raster::read_metadata(&vi_bands[&required[0]])?;
        meta.band_count = 1;
        meta.dtype = GdalDataType::Float32;
        let output = self.paths.work_path(&[tile.stem(), index.key()]);
        raster::write_image(&output, "GTiff", &meta, &[data.mapv(f64::from)])?;
        Ok(output)
    }

    /// Build the binary mask from the Sen2Cor scene classification. The
    /// SCL raster lives in an L2A product: the tile itself when it is
    /// (or became) L2A, otherwise the product a classification-only
    /// Sen2Cor run generates next to the input.
    fn build_scl_mask(
        &self,
        input_tile: &TileProduct,
        tile: &TileProduct,
        keep_codes: &[u8],
        props: &ImageProperties,
    ) -> Result<Array2<u8>> {
        let scl_tile = if tile.product_type == ProductType::L2A {
            tile.clone()
        } else {
            info!("running Sen2Cor scene classification only");
            external::scene_classification(&input_tile.dir)?;
            sentinel2::find_l2a_sibling(&self.paths.data_dir, &input_tile.name)?
        };
        let scl_bands = scl_tile.resolve_all_bands()?;
        let scl_path = scl_bands
            .get(SCL_BAND)
            .ok_or_else(|| sentinel2::MetadataError::BandNotFound(SCL_BAND.into()))?
            .clone();

        let scl_path = self.resample_classification(&scl_path, props)?;
        Ok(mask::binary_mask(&raster::read_band(&scl_path, 1)?, keep_codes))
    }

    /// Run Fmask over the original input, keep the raw classification
    /// next to the tile outputs, and build the binary mask from it.
    fn build_fmask_mask(
        &self,
        input_tile: &TileProduct,
        tile_output_dir: &Path,
        keep_codes: &[u8],
        props: &ImageProperties,
    ) -> Result<Array2<u8>> {
        info!("running Fmask cloud classification");
        let fmask_path = self.paths.work_path(&[input_tile.stem(), "FMASK"]);
        external::fmask_classification(&input_tile.dir, &fmask_path)?;

        let copied = tile_output_dir.join(format!("{}_FMASK.tif", input_tile.stem()));
        fs::copy(&fmask_path, &copied)?;

        let fmask_path = self.resample_classification(&fmask_path, props)?;
        Ok(mask::binary_mask(
            &raster::read_band(&fmask_path, 1)?,
            keep_codes,
        ))
    }

    /// Classification rasters hold discrete codes, so resampling always
    /// switches to nearest-neighbour, never the configured method.
    fn resample_classification(
        &self,
        path: &Path,
        props: &ImageProperties,
    ) -> Result<PathBuf> {
        let meta = raster::read_metadata(path)?;
        if meta.pixel_size() == props.resolution {
            return Ok(path.to_path_buf());
        }
        let near = ImageProperties {
            resampling_method: ResamplingMethod::Near,
            ..*props
        };
        let stem = stem_of(path);
        let destination = self.paths.work_path(&[&stem, "resampled"]);
        raster::resample_image(path, &destination, &near)
    }

    /// Apply a binary mask to every band in the map, writing each masked
    /// raster under a `<stem>_<tag>_masked` work name.
    fn mask_stage(
        &self,
        bands: BandPathMap,
        inclusion: &Array2<u8>,
        tag: &str,
    ) -> Result<BandPathMap> {
        let mut masked_bands = BandPathMap::new();
        for (key, path) in bands {
            let mut meta = raster::read_metadata(&path)?;
            let array = raster::read_band(&path, 1)?;
            if array.dim() != inclusion.dim() {
                return Err(Error::DimensionMismatch {
                    expected_rows: inclusion.nrows(),
                    expected_cols: inclusion.ncols(),
                    rows: array.nrows(),
                    cols: array.ncols(),
                });
            }
            let masked = mask::apply_mask(inclusion, &array);
            meta.band_count = 1;
            let stem = stem_of(&path);
            let destination = self.paths.work_path(&[&stem, tag, "masked"]);
            raster::write_image(&destination, "GTiff", &meta, &[masked])?;
            masked_bands.insert(key, destination);
        }
        Ok(masked_bands)
    }

    /// Divide each reflectance band by the fixed scale factor and rewrite
    /// it as Float32.
    fn calibrate_stage(&self, bands: BandPathMap) -> Result<BandPathMap> {
        let mut calibrated = BandPathMap::new();
        for (key, path) in bands {
            info!("calibrating band {}", key);
            let mut meta = raster::read_metadata(&path)?;
            let data = raster::read_band(&path, 1)? / REFLECTANCE_SCALE;
            meta.band_count = 1;
            meta.dtype = GdalDataType::Float32;
            let stem = stem_of(&path);
            let destination = self.paths.work_path(&[&stem, "cal"]);
            raster::write_image(&destination, "GTiff", &meta, &[data])?;
            calibrated.insert(key, destination);
        }
        Ok(calibrated)
    }

    /// Warp every band whose EPSG differs from the target CRS.
    fn reproject_stage(
        &self,
        bands: BandPathMap,
        props: &ImageProperties,
    ) -> Result<BandPathMap> {
        let mut reprojected = BandPathMap::new();
        for (key, path) in bands {
            let meta = raster::read_metadata(&path)?;
            if meta.epsg != Some(props.t_srs) {
                info!("reprojecting band {}", key);
                let stem = stem_of(&path);
                let resolution = props.resolution.to_string();
                let t_srs = props.t_srs.to_string();
                let destination = self.paths.work_path(&[
                    &stem,
                    &resolution,
                    props.resampling_method.as_gdal_str(),
                    &t_srs,
                ]);
                reprojected.insert(key, raster::warp_image(&path, &destination, props)?);
            } else {
                reprojected.insert(key, path);
            }
        }
        Ok(reprojected)
    }

    /// Combine the reflectance bands, in configured order, into one
    /// multi-band raster keyed `stacked`. Derived indices are unaffected.
    fn stack_stage(&self, tile: &TileProduct, bands: &BandPathMap) -> Result<BandPathMap> {
        info!("stacking bands");
        let mut arrays = Vec::with_capacity(self.config.output.bands.len());
        let mut meta = None;
        for band in &self.config.output.bands {
            let path = bands.get(band).ok_or_else(|| {
                Error::Processing(format!("band {} missing from output set", band))
            })?;
            meta = Some(raster::read_metadata(path)?);
            arrays.push(raster::read_band(path, 1)?);
        }
        let Some(mut meta) = meta else {
            return Err(Error::Processing("nothing to stack".into()));
        };
        meta.band_count = arrays.len();
        let destination = self.paths.work_path(&[tile.stem(), "stacked"]);
        raster::write_image(&destination, "GTiff", &meta, &arrays)?;

        let mut stacked = BandPathMap::new();
        stacked.insert("stacked".to_string(), destination);
        Ok(stacked)
    }
}
