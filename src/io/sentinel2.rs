use quick_xml::Reader;
use quick_xml::events::Event;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use crate::types::{ProductType, product_stem, sensing_date};

/// Resolution-qualified key of the Sen2Cor scene classification raster.
pub const SCL_BAND: &str = "SCL_20m";

/// Errors encountered while resolving a tile's metadata descriptor
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("XML parse error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("no metadata descriptor (MTD*.xml) under {0}")]
    MissingDescriptor(PathBuf),
    #[error("missing field `{0}` in product metadata")]
    MissingField(&'static str),
    #[error("unrecognized product identifier: {0}")]
    UnrecognizedProduct(String),
    #[error("band `{0}` not present in product")]
    BandNotFound(String),
    #[error("no L2A product matching {0} was produced")]
    MissingL2aProduct(String),
}

/// Band code → raster path, derived once per tile from its descriptor.
pub type BandPathMap = BTreeMap<String, PathBuf>;

/// One satellite acquisition granule on disk.
#[derive(Debug, Clone)]
pub struct TileProduct {
    pub dir: PathBuf,
    pub name: String,
    pub product_type: ProductType,
    pub sensing_date: String,
}

impl TileProduct {
    /// Identify a product from its directory name. The processing level
    /// sits at characters 7..10 and the sensing date at 11..19.
    pub fn open(dir: &Path) -> Result<Self, MetadataError> {
        let name = dir
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| MetadataError::UnrecognizedProduct(dir.display().to_string()))?
            .to_string();
        let product_type = ProductType::from_product_id(&name)
            .ok_or_else(|| MetadataError::UnrecognizedProduct(name.clone()))?;
        let date = sensing_date(&name)
            .ok_or_else(|| MetadataError::UnrecognizedProduct(name.clone()))?
            .to_string();
        Ok(TileProduct {
            dir: dir.to_path_buf(),
            name,
            product_type,
            sensing_date: date,
        })
    }

    /// Product name without the `.SAFE` suffix; the leading token of
    /// every file this tile emits.
    pub fn stem(&self) -> &str {
        product_stem(&self.name)
    }

    /// Locate the `MTD*.xml` metadata descriptor in the product root.
    pub fn metadata_descriptor(&self) -> Result<PathBuf, MetadataError> {
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.contains("MTD") && name.ends_with(".xml") {
                return Ok(path);
            }
        }
        Err(MetadataError::MissingDescriptor(self.dir.clone()))
    }

    /// Resolve every band listed in the metadata descriptor.
    pub fn resolve_all_bands(&self) -> Result<BandPathMap, MetadataError> {
        resolve_all_bands(&self.metadata_descriptor()?, self.product_type)
    }
}

/// Parse the granule image-file listing of a metadata descriptor into a
/// band → `.jp2` path map. TOA (L1C) products key by the plain band code
/// (last 3 characters of the image name); BOA (L2A) products key by the
/// resolution-qualified code (last 7, e.g. `B04_10m`).
pub fn resolve_all_bands(
    descriptor: &Path,
    product_type: ProductType,
) -> Result<BandPathMap, MetadataError> {
    let mut reader = Reader::from_file(descriptor)?;
    reader.trim_text(true);
    let base = descriptor
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    let key_len = match product_type {
        ProductType::L1C => 3,
        ProductType::L2A => 7,
    };

    let mut buf = Vec::new();
    let mut in_granule = false;
    let mut in_image_file = false;
    let mut bands = BandPathMap::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(ref e) => match e.name().as_ref() {
                b"Granule" => in_granule = true,
                b"IMAGE_FILE" if in_granule => in_image_file = true,
                _ => {}
            },
            Event::End(ref e) => match e.name().as_ref() {
                b"Granule" => in_granule = false,
                b"IMAGE_FILE" => in_image_file = false,
                _ => {}
            },
            Event::Text(e) if in_image_file => {
                let text = e.unescape()?.to_string();
                if text.len() >= key_len {
                    let key = text[text.len() - key_len..].to_string();
                    bands.insert(key, base.join(format!("{}.jp2", text)));
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if bands.is_empty() {
        return Err(MetadataError::MissingField("Granule/IMAGE_FILE"));
    }
    info!("resolved {} bands from {:?}", bands.len(), descriptor);
    Ok(bands)
}

/// Requested ∩ available for TOA products (plain band codes).
pub fn subset_toa(required: &[String], all_bands: &BandPathMap) -> BandPathMap {
    all_bands
        .iter()
        .filter(|(key, _)| required.iter().any(|band| band == *key))
        .map(|(key, path)| (key.clone(), path.clone()))
        .collect()
}

/// Requested ∩ available for BOA products: prefer the 10 m variant of a
/// band, fall back to 20 m. The result is keyed by the plain band code.
pub fn subset_boa(required: &[String], all_bands: &BandPathMap) -> BandPathMap {
    let mut subset = BandPathMap::new();
    for band in required {
        let key_10m = format!("{}_10m", band);
        let key_20m = format!("{}_20m", band);
        if let Some(path) = all_bands.get(&key_10m).or_else(|| all_bands.get(&key_20m)) {
            subset.insert(band.clone(), path.clone());
        }
    }
    subset
}

/// Subset dispatch on the product type.
pub fn subset_bands(
    required: &[String],
    all_bands: &BandPathMap,
    product_type: ProductType,
) -> BandPathMap {
    match product_type {
        ProductType::L1C => subset_toa(required, all_bands),
        ProductType::L2A => subset_boa(required, all_bands),
    }
}

/// Every required band must have resolved; a missing band entry is fatal
/// for the tile.
pub fn require_bands(required: &[String], subset: &BandPathMap) -> Result<(), MetadataError> {
    for band in required {
        if !subset.contains_key(band) {
            return Err(MetadataError::BandNotFound(band.clone()));
        }
    }
    Ok(())
}

/// After a Sen2Cor run, locate the L2A product generated next to an L1C
/// input: same datatake (characters 11..26), level L2A.
pub fn find_l2a_sibling(data_dir: &Path, l1c_name: &str) -> Result<TileProduct, MetadataError> {
    let datatake = l1c_name.get(11..26);
    for entry in fs::read_dir(data_dir)? {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.get(7..10) == Some("L2A") && name.get(11..26) == datatake {
            return TileProduct::open(&path);
        }
    }
    Err(MetadataError::MissingL2aProduct(l1c_name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const L1C_NAME: &str = "S2A_MSIL1C_20200106T102421_N0208_R065_T32UNE_20200106T121050.SAFE";
    const L2A_NAME: &str = "S2A_MSIL2A_20200106T102421_N0208_R065_T32UNE_20200106T121050.SAFE";

    fn write_descriptor(dir: &Path, image_files: &[&str]) -> PathBuf {
        let mut body = String::from(
            "<n1:Level-1C_User_Product>\n<Product_Organisation><Granule_List><Granule>\n",
        );
        for image in image_files {
            body.push_str(&format!("<IMAGE_FILE>{}</IMAGE_FILE>\n", image));
        }
        body.push_str("</Granule></Granule_List></Product_Organisation>\n</n1:Level-1C_User_Product>");
        let path = dir.join("MTD_MSIL1C.xml");
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn toa_bands_key_by_plain_band_code() {
        let dir = tempfile::tempdir().unwrap();
        let descriptor = write_descriptor(
            dir.path(),
            &[
                "GRANULE/L1C_T32UNE/IMG_DATA/T32UNE_20200106T102421_B04",
                "GRANULE/L1C_T32UNE/IMG_DATA/T32UNE_20200106T102421_B08",
            ],
        );
        let bands = resolve_all_bands(&descriptor, ProductType::L1C).unwrap();
        assert_eq!(bands.len(), 2);
        assert!(bands["B04"].ends_with("T32UNE_20200106T102421_B04.jp2"));
        assert!(bands["B08"].starts_with(dir.path()));
    }

    #[test]
    fn boa_bands_key_by_resolution_qualified_code() {
        let dir = tempfile::tempdir().unwrap();
        let descriptor = write_descriptor(
            dir.path(),
            &[
                "GRANULE/L2A_T32UNE/IMG_DATA/R10m/T32UNE_20200106T102421_B04_10m",
                "GRANULE/L2A_T32UNE/IMG_DATA/R20m/T32UNE_20200106T102421_B11_20m",
                "GRANULE/L2A_T32UNE/IMG_DATA/R20m/T32UNE_20200106T102421_SCL_20m",
            ],
        );
        let bands = resolve_all_bands(&descriptor, ProductType::L2A).unwrap();
        assert!(bands.contains_key("B04_10m"));
        assert!(bands.contains_key("B11_20m"));
        assert!(bands.contains_key(SCL_BAND));
    }

    #[test]
    fn empty_descriptor_is_a_metadata_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("MTD_MSIL1C.xml");
        fs::write(&path, "<Product_Organisation/>").unwrap();
        assert!(matches!(
            resolve_all_bands(&path, ProductType::L1C),
            Err(MetadataError::MissingField(_))
        ));
    }

    #[test]
    fn toa_subset_is_exact_intersection() {
        let mut all = BandPathMap::new();
        all.insert("B04".into(), PathBuf::from("B04.jp2"));
        all.insert("B08".into(), PathBuf::from("B08.jp2"));
        all.insert("B11".into(), PathBuf::from("B11.jp2"));

        let required = vec!["B04".to_string(), "B08".to_string(), "B99".to_string()];
        let subset = subset_toa(&required, &all);
        assert_eq!(subset.len(), 2);
        assert!(subset.contains_key("B04"));
        assert!(subset.contains_key("B08"));
        // no spurious keys, no invented entries
        assert!(!subset.contains_key("B11"));
        assert!(!subset.contains_key("B99"));
    }

    #[test]
    fn boa_subset_prefers_10m_and_falls_back_to_20m() {
        let mut all = BandPathMap::new();
        all.insert("B04_10m".into(), PathBuf::from("R10m/B04.jp2"));
        all.insert("B04_20m".into(), PathBuf::from("R20m/B04.jp2"));
        all.insert("B11_20m".into(), PathBuf::from("R20m/B11.jp2"));

        let required = vec!["B04".to_string(), "B11".to_string(), "B99".to_string()];
        let subset = subset_boa(&required, &all);
        assert_eq!(subset["B04"], PathBuf::from("R10m/B04.jp2"));
        assert_eq!(subset["B11"], PathBuf::from("R20m/B11.jp2"));
        assert!(!subset.contains_key("B99"));

        assert!(matches!(
            require_bands(&required, &subset),
            Err(MetadataError::BandNotFound(band)) if band == "B99"
        ));
    }

    #[test]
    fn tile_product_from_directory_name() {
        let dir = tempfile::tempdir().unwrap();
        let tile_dir = dir.path().join(L1C_NAME);
        fs::create_dir(&tile_dir).unwrap();
        let tile = TileProduct::open(&tile_dir).unwrap();
        assert_eq!(tile.product_type, ProductType::L1C);
        assert_eq!(tile.sensing_date, "20200106");
        assert_eq!(
            tile.stem(),
            "S2A_MSIL1C_20200106T102421_N0208_R065_T32UNE_20200106T121050"
        );
    }

    #[test]
    fn l2a_sibling_matches_on_datatake() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join(L1C_NAME)).unwrap();
        fs::create_dir(dir.path().join(L2A_NAME)).unwrap();
        // a different datatake must not match
        fs::create_dir(
            dir.path()
                .join("S2A_MSIL2A_20200212T102421_N0208_R065_T32UNE_20200212T121050.SAFE"),
        )
        .unwrap();

        let sibling = find_l2a_sibling(dir.path(), L1C_NAME).unwrap();
        assert_eq!(sibling.name, L2A_NAME);
        assert_eq!(sibling.product_type, ProductType::L2A);
    }

    #[test]
    fn missing_l2a_sibling_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join(L1C_NAME)).unwrap();
        assert!(matches!(
            find_l2a_sibling(dir.path(), L1C_NAME),
            Err(MetadataError::MissingL2aProduct(_))
        ));
    }
}
