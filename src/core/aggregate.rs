//! Cross-tile aggregation: spatial mosaics, multi-date averages, and
//! cutline clipping over directories of per-tile outputs.
use ndarray::{Array2, Zip};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::external::run_command;
use crate::io::gdal::{self as raster};
use crate::io::vector;
use crate::types::{ResamplingMethod, product_stem, sensing_date};
use gdal::raster::GdalDataType;

/// Trailing product-variant token of a file name: the part after the
/// last underscore, extension included (`..._B04.tif` → `B04.tif`).
fn variant_token(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    name.rsplit('_').next().map(str::to_string)
}

fn tif_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("tif"))
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Collect the per-tile output rasters for `image_list`, grouped by
/// variant token. Within a group files keep image-list order, so a
/// later-listed tile overlays an earlier one when mosaicked.
fn collect_variant_groups(
    output_dir: &Path,
    image_list: &[String],
) -> Result<BTreeMap<String, Vec<PathBuf>>> {
    let mut groups: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
    for image in image_list {
        let tile_dir = output_dir.join(product_stem(image));
        for file in tif_files(&tile_dir)? {
            if let Some(token) = variant_token(&file) {
                groups.entry(token).or_default().push(file);
            }
        }
    }
    Ok(groups)
}

fn sensing_dates(image_list: &[String]) -> Vec<&str> {
    image_list
        .iter()
        .filter_map(|image| sensing_date(image))
        .collect()
}

/// Build one mosaic per product variant from the listed tiles' outputs.
/// Contributors are layered in image-list order (last listed on top) via
/// a virtual overlay, then materialized as a flat GeoTIFF.
pub fn build_mosaic(
    output_dir: &Path,
    image_list: &[String],
    mosaic_dir: &Path,
    resampling_method: ResamplingMethod,
) -> Result<()> {
    let groups = collect_variant_groups(output_dir, image_list)?;
    let dates = sensing_dates(image_list);

    for (token, members) in &groups {
        info!("building mosaic for variant {}", token);
        let variant = token.strip_suffix(".tif").unwrap_or(token.as_str());
        let mut tokens: Vec<&str> = dates.clone();
        tokens.push("mosaic");
        tokens.push(variant);
        let vrt = mosaic_dir.join(format!("{}.vrt", tokens.join("_")));

        let mut args: Vec<String> = vec![
            vrt.to_string_lossy().into_owned(),
            "-r".into(),
            resampling_method.as_gdal_str().into(),
        ];
        args.extend(members.iter().map(|m| m.to_string_lossy().into_owned()));
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        run_command("gdalbuildvrt", &arg_refs)?;

        let output = vrt.with_extension("tif");
        let vrt_str = vrt.to_string_lossy();
        let output_str = output.to_string_lossy();
        run_command(
            "gdal_translate",
            &["-of", "GTiff", vrt_str.as_ref(), output_str.as_ref()],
        )?;
    }

    // the overlay intermediates are not products
    for entry in fs::read_dir(mosaic_dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "vrt") {
            if let Err(e) = fs::remove_file(&path) {
                warn!("unable to remove {:?}: {}", path, e);
            }
        }
    }
    Ok(())
}

/// Per-pixel arithmetic mean that treats NaN as missing for that
/// contributor. Cells that are NaN in every contributor stay NaN.
pub(crate) fn nan_mean(arrays: &[Array2<f64>]) -> Result<Array2<f64>> {
    let first = arrays
        .first()
        .ok_or_else(|| Error::Processing("nothing to average".into()))?;
    let dim = first.dim();
    for array in arrays {
        if array.dim() != dim {
            return Err(Error::DimensionMismatch {
                expected_rows: dim.0,
                expected_cols: dim.1,
                rows: array.nrows(),
                cols: array.ncols(),
            });
        }
    }

    let mut sum = Array2::<f64>::zeros(dim);
    let mut count = Array2::<u32>::zeros(dim);
    for array in arrays {
        Zip::from(&mut sum)
            .and(&mut count)
            .and(array)
            .for_each(|s, c, &v| {
                if !v.is_nan() {
                    *s += v;
                    *c += 1;
                }
            });
    }

    let mut mean = Array2::<f64>::zeros(dim);
    Zip::from(&mut mean).and(&sum).and(&count).for_each(|m, &s, &c| {
        *m = if c > 0 { s / f64::from(c) } else { f64::NAN };
    });
    Ok(mean)
}

fn find_mosaic(mosaic_dir: &Path, token: &str) -> Result<Option<PathBuf>> {
    if !mosaic_dir.is_dir() {
        return Ok(None);
    }
    let suffix = format!("_{}", token);
    Ok(tif_files(mosaic_dir)?
        .into_iter()
        .find(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(&suffix))
        }))
}

/// Reduce each product-variant group to its per-pixel mean across all
/// listed tiles, NaN-aware, writing one Float32 raster per variant.
/// When `include_mosaic` is set, a previously built mosaic for the same
/// variant joins the contributor list.
pub fn compute_average(
    output_dir: &Path,
    image_list: &[String],
    average_dir: &Path,
    include_mosaic: bool,
    mosaic_dir: &Path,
) -> Result<()> {
    let groups = collect_variant_groups(output_dir, image_list)?;
    let dates = sensing_dates(image_list);

    for (token, members) in &groups {
        info!("averaging variant {}", token);
        let mut members = members.clone();
        if include_mosaic {
            if let Some(mosaic) = find_mosaic(mosaic_dir, token)? {
                info!("including mosaic {:?} in the average", mosaic);
                members.push(mosaic);
            }
        }
        let Some(first) = members.first() else {
            continue;
        };

        let mut meta = raster::read_metadata(first)?;
        let mut arrays = Vec::with_capacity(meta.band_count);
        for band in 1..=meta.band_count {
            let band_list: Vec<Array2<f64>> = members
                .iter()
                .map(|member| raster::read_band(member, band))
                .collect::<std::result::Result<_, _>>()?;
            arrays.push(nan_mean(&band_list)?);
        }

        meta.dtype = GdalDataType::Float32;
        // the variant token carries the extension, so the join is complete
        let mut tokens: Vec<&str> = dates.clone();
        tokens.push("averaged");
        tokens.push(token.as_str());
        let output = average_dir.join(tokens.join("_"));
        raster::write_image(&output, "GTiff", &meta, &arrays)?;
    }
    Ok(())
}

/// Crop every raster in `image_dir` to each polygon of the cutline
/// feature collection, reprojecting the features first when their CRS
/// differs from the rasters'. With more than one polygon, outputs land
/// in per-feature-ID subdirectories; with exactly one, they stay flat.
pub fn crop_to_cutline(image_dir: &Path, feature_file: &Path) -> Result<()> {
    let rasters = tif_files(image_dir)?;
    if rasters.is_empty() {
        warn!("no rasters to clip under {:?}", image_dir);
        return Ok(());
    }

    let raster_epsg = raster::read_metadata(&rasters[0])?.epsg;
    let vector_epsg = vector::vector_epsg(feature_file)?;

    let mut _reprojected: Option<tempfile::TempDir> = None;
    let cutline = match (vector_epsg, raster_epsg) {
        (Some(from), Some(to)) if from != to => {
            info!("reprojecting cutline features to EPSG:{}", to);
            let scratch = tempfile::tempdir()?;
            let destination = scratch.path().join("features.geojson");
            vector::reproject_features(feature_file, &destination, to)?;
            _reprojected = Some(scratch);
            destination
        }
        _ => feature_file.to_path_buf(),
    };

    let fids = vector::feature_ids(&cutline)?;
    if fids.is_empty() {
        return Err(Error::Processing(format!(
            "cutline {} has no features",
            feature_file.display()
        )));
    }

    for raster_path in &rasters {
        let stem = raster_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "raster".into());
        for &fid in &fids {
            let output = if fids.len() > 1 {
                let subdir = image_dir.join(fid.to_string());
                fs::create_dir_all(&subdir)?;
                subdir.join(format!("{}_{}.tif", stem, fid))
            } else {
                image_dir.join(format!("{}_{}.tif", stem, fid))
            };
            info!("clipping {:?} to feature {}", raster_path, fid);
            raster::crop_to_feature(raster_path, &output, &cutline, fid)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn variant_token_is_the_trailing_component() {
        assert_eq!(
            variant_token(Path::new("/out/S2A_MSIL1C_20200106_B04.tif")),
            Some("B04.tif".to_string())
        );
        assert_eq!(
            variant_token(Path::new("tile_stacked.tif")),
            Some("stacked.tif".to_string())
        );
        assert_eq!(
            variant_token(Path::new("nounderscore.tif")),
            Some("nounderscore.tif".to_string())
        );
    }

    #[test]
    fn groups_preserve_image_list_order() {
        let scratch = tempfile::tempdir().unwrap();
        let first = "S2A_MSIL1C_20200106T102421_N0208_R065_T32UNE_20200106T121050.SAFE";
        let second = "S2B_MSIL1C_20200111T102329_N0208_R065_T32UME_20200111T123123.SAFE";
        for image in [first, second] {
            let dir = scratch.path().join(product_stem(image));
            fs::create_dir(&dir).unwrap();
            fs::write(dir.join(format!("{}_ndvi.tif", product_stem(image))), b"x").unwrap();
            fs::write(dir.join(format!("{}_B04.tif", product_stem(image))), b"x").unwrap();
        }

        let list = vec![first.to_string(), second.to_string()];
        let groups = collect_variant_groups(scratch.path(), &list).unwrap();
        assert_eq!(groups.len(), 2);

        let ndvi = &groups["ndvi.tif"];
        assert_eq!(ndvi.len(), 2);
        // the later-listed tile comes last, so it renders on top
        assert!(ndvi[0].to_string_lossy().contains("S2A_MSIL1C_20200106"));
        assert!(ndvi[1].to_string_lossy().contains("S2B_MSIL1C_20200111"));
    }

    #[test]
    fn nan_mean_skips_missing_contributors() {
        let a = array![[1.0, f64::NAN]];
        let b = array![[3.0, 5.0]];
        let mean = nan_mean(&[a, b]).unwrap();
        assert_relative_eq!(mean[[0, 0]], 2.0);
        assert_relative_eq!(mean[[0, 1]], 5.0);
    }

    #[test]
    fn nan_mean_keeps_all_missing_as_nan() {
        let a = array![[f64::NAN]];
        let b = array![[f64::NAN]];
        let mean = nan_mean(&[a, b]).unwrap();
        assert!(mean[[0, 0]].is_nan());
    }

    #[test]
    fn nan_mean_rejects_mismatched_shapes() {
        let a = Array2::<f64>::zeros((1, 2));
        let b = Array2::<f64>::zeros((2, 1));
        assert!(matches!(
            nan_mean(&[a, b]),
            Err(Error::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn mosaic_lookup_matches_variant_suffix() {
        let scratch = tempfile::tempdir().unwrap();
        fs::write(scratch.path().join("20200106_20200111_mosaic_ndvi.tif"), b"x").unwrap();
        let found = find_mosaic(scratch.path(), "ndvi.tif").unwrap();
        assert!(found.is_some());
        assert!(find_mosaic(scratch.path(), "B04.tif").unwrap().is_none());
        assert!(
            find_mosaic(&scratch.path().join("missing"), "ndvi.tif")
                .unwrap()
                .is_none()
        );
    }
}
