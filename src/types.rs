//! Shared types and enums used across s2ard.
//! Includes `ProductType`, `SpectralIndex`, `ResamplingMethod`,
//! `ImageProperties`, and the positional product-identifier helpers.
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Digital numbers divide by this to become reflectance fractions.
pub const REFLECTANCE_SCALE: f64 = 10_000.0;

/// Sentinel-2 processing level, encoded at characters 7..10 of the
/// product identifier (`S2A_MSIL1C_20200106T...`).
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum ProductType {
    /// Level-1C, top-of-atmosphere.
    L1C,
    /// Level-2A, bottom-of-atmosphere (atmospherically corrected).
    L2A,
}

impl ProductType {
    /// Extract the processing level from a product identifier.
    pub fn from_product_id(id: &str) -> Option<Self> {
        match id.get(7..10)? {
            "L1C" => Some(ProductType::L1C),
            "L2A" => Some(ProductType::L2A),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProductType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProductType::L1C => write!(f, "L1C"),
            ProductType::L2A => write!(f, "L2A"),
        }
    }
}

/// Sensing date token at characters 11..19 of the product identifier,
/// validated as `YYYYMMDD`.
pub fn sensing_date(product_id: &str) -> Option<&str> {
    let date = product_id.get(11..19)?;
    NaiveDate::parse_from_str(date, "%Y%m%d").ok()?;
    Some(date)
}

/// Product directory name without its `.SAFE` suffix; the token every
/// output file name starts with.
pub fn product_stem(product_id: &str) -> &str {
    product_id.strip_suffix(".SAFE").unwrap_or(product_id)
}

/// Derived spectral products, each with a fixed ordered band requirement.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpectralIndex {
    /// Normalized difference vegetation index (NIR, red).
    Ndvi,
    /// Normalized difference water index (NIR, SWIR1).
    Ndwi,
    /// Normalized difference tillage index (SWIR1, SWIR2).
    Ndti,
    /// Crop residue cover (SWIR1, blue).
    Crc,
    /// Visible difference vegetation index (blue, green, red).
    Vdvi,
    /// Bare soil index (blue, red, NIR, SWIR1).
    Bsi,
    /// Bare soil ratio variant, computed on raw digital numbers.
    Bsi2,
}

impl SpectralIndex {
    /// Band codes the index needs, in formula argument order.
    pub fn required_bands(self) -> &'static [&'static str] {
        match self {
            SpectralIndex::Ndvi => &["B08", "B04"],
            SpectralIndex::Ndwi => &["B08", "B11"],
            SpectralIndex::Ndti => &["B11", "B12"],
            SpectralIndex::Crc => &["B11", "B02"],
            SpectralIndex::Vdvi => &["B02", "B03", "B04"],
            SpectralIndex::Bsi => &["B02", "B04", "B08", "B11"],
            SpectralIndex::Bsi2 => &["B02", "B04", "B08", "B11"],
        }
    }

    /// Output key used in file names and the output-band map.
    pub fn key(self) -> &'static str {
        match self {
            SpectralIndex::Ndvi => "ndvi",
            SpectralIndex::Ndwi => "ndwi",
            SpectralIndex::Ndti => "ndti",
            SpectralIndex::Crc => "crc",
            SpectralIndex::Vdvi => "vdvi",
            SpectralIndex::Bsi => "bsi",
            SpectralIndex::Bsi2 => "bsi2",
        }
    }

    /// Two-band (b1 - b2) / (b1 + b2) family; results are bounded to [-1, 1].
    pub fn is_normalized_difference(self) -> bool {
        matches!(
            self,
            SpectralIndex::Ndvi | SpectralIndex::Ndwi | SpectralIndex::Ndti | SpectralIndex::Crc
        )
    }
}

impl std::fmt::Display for SpectralIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// Resampling methods understood by the GDAL warp/translate tools.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResamplingMethod {
    #[default]
    Near,
    Bilinear,
    Cubic,
    CubicSpline,
    Lanczos,
    Average,
    Mode,
}

impl ResamplingMethod {
    /// The `-r` argument value for `gdalwarp`/`gdal_translate`/`gdalbuildvrt`.
    pub fn as_gdal_str(self) -> &'static str {
        match self {
            ResamplingMethod::Near => "near",
            ResamplingMethod::Bilinear => "bilinear",
            ResamplingMethod::Cubic => "cubic",
            ResamplingMethod::CubicSpline => "cubicspline",
            ResamplingMethod::Lanczos => "lanczos",
            ResamplingMethod::Average => "average",
            ResamplingMethod::Mode => "mode",
        }
    }
}

impl std::fmt::Display for ResamplingMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_gdal_str())
    }
}

/// Resolved per-tile target image properties. Every raster a tile emits
/// is driven toward these.
#[derive(Debug, Clone, Copy)]
pub struct ImageProperties {
    /// Target pixel size in CRS units.
    pub resolution: f64,
    /// Target EPSG code.
    pub t_srs: u32,
    /// Method for continuous data; classification rasters always switch
    /// to nearest-neighbour regardless of this setting.
    pub resampling_method: ResamplingMethod,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn product_type_from_identifier() {
        assert_eq!(
            ProductType::from_product_id("S2A_MSIL1C_20200106T102421_N0208_R065_T32UNE_20200106T121050.SAFE"),
            Some(ProductType::L1C)
        );
        assert_eq!(
            ProductType::from_product_id("S2A_MSIL2A_20200106T102421_N0208_R065_T32UNE_20200106T121050.SAFE"),
            Some(ProductType::L2A)
        );
        assert_eq!(ProductType::from_product_id("S2A_MSIXYZ_2020"), None);
        assert_eq!(ProductType::from_product_id("short"), None);
    }

    #[test]
    fn sensing_date_token() {
        assert_eq!(
            sensing_date("S2A_MSIL1C_20200106T102421_N0208_R065_T32UNE_20200106T121050.SAFE"),
            Some("20200106")
        );
        // not a calendar date
        assert_eq!(sensing_date("S2A_MSIL1C_20201341T102421"), None);
        assert_eq!(sensing_date("tooshort"), None);
    }

    #[test]
    fn product_stem_strips_safe_suffix() {
        assert_eq!(product_stem("S2A_X.SAFE"), "S2A_X");
        assert_eq!(product_stem("S2A_X"), "S2A_X");
    }

    #[test]
    fn index_band_requirements() {
        assert_eq!(SpectralIndex::Ndvi.required_bands(), &["B08", "B04"]);
        assert_eq!(SpectralIndex::Bsi.required_bands(), SpectralIndex::Bsi2.required_bands());
        assert!(SpectralIndex::Crc.is_normalized_difference());
        assert!(!SpectralIndex::Vdvi.is_normalized_difference());
    }

    #[test]
    fn index_names_deserialize_lowercase() {
        let parsed: Vec<SpectralIndex> = serde_yaml::from_str("[ndvi, bsi2, vdvi]").unwrap();
        assert_eq!(
            parsed,
            vec![SpectralIndex::Ndvi, SpectralIndex::Bsi2, SpectralIndex::Vdvi]
        );
    }

    #[test]
    fn resampling_method_gdal_names() {
        let parsed: ResamplingMethod = serde_yaml::from_str("cubicspline").unwrap();
        assert_eq!(parsed, ResamplingMethod::CubicSpline);
        assert_eq!(parsed.as_gdal_str(), "cubicspline");
        assert_eq!(ResamplingMethod::default(), ResamplingMethod::Near);
    }
}
