use std::collections::HashMap;
use std::fs;

use tracing::{info, warn};

use s2ard::config::JobConfig;
use s2ard::core::aggregate;
use s2ard::core::pipeline::{JobPaths, TileProcessor};
use s2ard::error::{Error, Result};

use super::args::CliArgs;

/// Substitute corrected (renamed) product identifiers in place, keeping
/// the configured order. Mosaic z-order follows list order, so renames
/// must never reorder.
fn resolve_image_list(list: &[String], renames: &HashMap<String, String>) -> Vec<String> {
    list.iter()
        .map(|name| renames.get(name).cloned().unwrap_or_else(|| name.clone()))
        .collect()
}

pub fn run(args: CliArgs) -> Result<()> {
    if args.log {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    }

    // job-level configuration failures abort before any tile is touched
    let config = JobConfig::from_file(&args.config)?;
    let features = args.aoi.as_deref().filter(|path| path.exists());
    config.validate(features)?;

    let paths = JobPaths {
        data_dir: args.tiles.clone(),
        work_dir: args.work_dir.clone(),
        output_dir: args.output_dir.clone(),
    };
    fs::create_dir_all(&paths.work_dir)?;
    fs::create_dir_all(&paths.output_dir)?;

    // L1C → L2A name updates collected across the tile loop
    let mut renames: HashMap<String, String> = HashMap::new();
    let mut failed = 0usize;

    for tile_config in &config.images {
        info!("processing image: {}", tile_config.tile);

        if let Err(e) = tile_config.validate(features) {
            warn!("skipping tile {}: {}", tile_config.tile, e);
            failed += 1;
            continue;
        }
        if !paths.data_dir.join(&tile_config.tile).is_dir() {
            warn!("unable to process tile {}: no such directory", tile_config.tile);
            failed += 1;
            continue;
        }

        match TileProcessor::new(tile_config, &paths, features).run() {
            Ok(outcome) => {
                info!("successfully processed: {}", tile_config.tile);
                if outcome.final_name != tile_config.tile {
                    renames.insert(tile_config.tile.clone(), outcome.final_name);
                }
            }
            Err(e) => {
                warn!("error processing {}: {}", tile_config.tile, e);
                failed += 1;
            }
        }
    }

    // canonical identifier resolution, applied once before aggregation
    let mosaic_list = resolve_image_list(&config.mosaic.image_list, &renames);
    let average_list = resolve_image_list(&config.average.image_list, &renames);

    if config.mosaic.build_mosaic {
        info!("building tile mosaics");
        let mosaic_dir = paths.output_dir.join("mosaic");
        fs::create_dir_all(&mosaic_dir)?;
        aggregate::build_mosaic(
            &paths.output_dir,
            &mosaic_list,
            &mosaic_dir,
            config.mosaic.resampling_method,
        )?;

        if config.mosaic.clip {
            if let Some(aoi) = &config.mosaic.aoi_file {
                aggregate::crop_to_cutline(&mosaic_dir, &paths.data_dir.join(aoi))?;
            } else if let Some(features) = features {
                aggregate::crop_to_cutline(&mosaic_dir, features)?;
            }
        }
    }

    if config.average.compute_average {
        info!("averaging images");
        let average_dir = paths.output_dir.join("average");
        fs::create_dir_all(&average_dir)?;
        aggregate::compute_average(
            &paths.output_dir,
            &average_list,
            &average_dir,
            config.average.include_mosaic,
            &paths.output_dir.join("mosaic"),
        )?;

        if config.average.clip {
            if let Some(features) = features {
                aggregate::crop_to_cutline(&average_dir, features)?;
            }
        }
    }

    if failed > 0 {
        return Err(Error::TilesFailed { count: failed });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renames_substitute_in_place() {
        let list = vec!["a.SAFE".to_string(), "b.SAFE".to_string(), "c.SAFE".to_string()];
        let mut renames = HashMap::new();
        renames.insert("b.SAFE".to_string(), "b-l2a.SAFE".to_string());
        renames.insert("unrelated.SAFE".to_string(), "x.SAFE".to_string());

        let resolved = resolve_image_list(&list, &renames);
        assert_eq!(resolved, vec!["a.SAFE", "b-l2a.SAFE", "c.SAFE"]);
    }
}
