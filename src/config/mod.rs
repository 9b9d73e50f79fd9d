//! Typed job configuration. A job file (YAML, or JSON by extension)
//! carries one entry per tile plus mosaic/average settings; it is
//! deserialized into a closed set of named fields with documented
//! defaults and validated once at load time.
use serde::{Deserialize, Deserializer};
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};
use crate::types::{ResamplingMethod, SpectralIndex};

/// Accepts either a value or the YAML literal `false` (meaning "absent").
fn false_as_none<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum FalseOr<T> {
        Flag(bool),
        Value(T),
    }
    match FalseOr::<T>::deserialize(deserializer)? {
        FalseOr::Flag(false) => Ok(None),
        FalseOr::Flag(true) => Err(serde::de::Error::custom("expected a value or `false`")),
        FalseOr::Value(value) => Ok(Some(value)),
    }
}

fn default_resolution() -> f64 {
    10.0
}

/// Whole-job configuration: one entry per tile plus aggregation settings.
#[derive(Debug, Clone, Deserialize)]
pub struct JobConfig {
    #[serde(default)]
    pub images: Vec<TileConfig>,

    #[serde(rename = "mosaic-settings", default)]
    pub mosaic: MosaicSettings,

    #[serde(rename = "average-settings", default)]
    pub average: AverageSettings,
}

/// Per-tile settings block.
#[derive(Debug, Clone, Deserialize)]
pub struct TileConfig {
    /// Product directory name (`....SAFE`) under the data directory.
    pub tile: String,

    #[serde(rename = "ard-settings", default)]
    pub ard: ArdSettings,

    #[serde(rename = "cloud-mask-settings", default)]
    pub cloud_mask: CloudMaskSettings,

    #[serde(rename = "output-image-settings", default)]
    pub output: OutputImageSettings,
}

/// Stage gates; absent keys default to disabled.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ArdSettings {
    pub atm_corr: bool,
    pub cloud_mask: bool,
    pub stack: bool,
    pub calibrate: bool,
    pub clip: bool,
    pub derived_index: bool,
}

/// Classification codes to keep when building cloud masks. Each list may
/// be a code list or `false`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct CloudMaskSettings {
    #[serde(deserialize_with = "false_as_none")]
    pub sen2cor_scl_codes: Option<Vec<u8>>,
    #[serde(deserialize_with = "false_as_none")]
    pub fmask_codes: Option<Vec<u8>>,
}

/// Target image properties and product content for one tile.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct OutputImageSettings {
    /// Reflectance bands to carry through the pipeline.
    pub bands: Vec<String>,
    /// Derived indices, or `false` for none.
    #[serde(deserialize_with = "false_as_none")]
    pub vi: Option<Vec<SpectralIndex>>,
    /// Target pixel size in CRS units.
    pub resolution: f64,
    /// Target EPSG code, or `false` to adopt the tile's native CRS.
    #[serde(deserialize_with = "false_as_none")]
    pub t_srs: Option<u32>,
    pub resampling_method: ResamplingMethod,
}

impl Default for OutputImageSettings {
    fn default() -> Self {
        Self {
            bands: Vec::new(),
            vi: None,
            resolution: default_resolution(),
            t_srs: None,
            resampling_method: ResamplingMethod::Near,
        }
    }
}

/// Cross-tile mosaic job.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct MosaicSettings {
    pub build_mosaic: bool,
    pub resampling_method: ResamplingMethod,
    pub clip: bool,
    /// Ordered: the last listed tile renders on top.
    pub image_list: Vec<String>,
    /// Cutline for the post-mosaic clip, resolved relative to the data
    /// directory; the job-level AOI is used when absent.
    pub aoi_file: Option<String>,
}

/// Multi-date averaging job.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct AverageSettings {
    pub compute_average: bool,
    pub clip: bool,
    pub image_list: Vec<String>,
    /// Fold a previously built mosaic into the mean as an extra contributor.
    pub include_mosaic: bool,
}

impl JobConfig {
    /// Load a job file. `.json` parses as JSON, everything else as YAML.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let config: JobConfig = match ext {
            "json" => serde_json::from_str(&contents)
                .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?,
            _ => serde_yaml::from_str(&contents)
                .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?,
        };
        Ok(config)
    }

    /// Job-level validation, run once before any tile is processed.
    /// Per-tile settings are validated separately so a bad tile entry
    /// skips that tile instead of aborting the run.
    pub fn validate(&self, features: Option<&Path>) -> Result<()> {
        if self.images.is_empty() {
            return Err(Error::Config("no images configured".into()));
        }
        if self.mosaic.build_mosaic && self.mosaic.image_list.len() < 2 {
            return Err(Error::Config(
                "mosaic-settings: image-list needs at least two tiles".into(),
            ));
        }
        if self.mosaic.build_mosaic && self.mosaic.clip {
            if self.mosaic.aoi_file.is_none() && features.is_none() {
                return Err(Error::Config(
                    "mosaic-settings: clip is set but no aoi-file or job AOI is available".into(),
                ));
            }
        }
        if self.average.compute_average && self.average.image_list.is_empty() {
            return Err(Error::Config(
                "average-settings: image-list must not be empty".into(),
            ));
        }
        if self.average.compute_average && self.average.clip && features.is_none() {
            return Err(Error::Config(
                "average-settings: clip is set but no job AOI is available".into(),
            ));
        }
        Ok(())
    }
}

impl TileConfig {
    /// Per-tile validation; a failure here skips the tile, not the job.
    pub fn validate(&self, features: Option<&Path>) -> Result<()> {
        if self.output.bands.is_empty() {
            return Err(Error::Config(format!(
                "{}: output-image-settings.bands must not be empty",
                self.tile
            )));
        }
        if self.ard.derived_index
            && self.output.vi.as_ref().is_none_or(|indices| indices.is_empty())
        {
            return Err(Error::Config(format!(
                "{}: derived-index is set but vi lists no indices",
                self.tile
            )));
        }
        if self.ard.cloud_mask
            && self.cloud_mask.sen2cor_scl_codes.is_none()
            && self.cloud_mask.fmask_codes.is_none()
        {
            return Err(Error::Config(format!(
                "{}: cloud-mask is set but no scl or fmask codes are configured",
                self.tile
            )));
        }
        if self.ard.clip && features.is_none() {
            return Err(Error::Config(format!(
                "{}: clip is set but no AOI features were supplied",
                self.tile
            )));
        }
        Ok(())
    }
}
