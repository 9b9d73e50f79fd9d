//! I/O layer for Sentinel-2 products, GDAL-backed rasters, and vector
//! cutlines. Provides the `sentinel2` band resolver, the `gdal` raster
//! adapter, and `vector` feature-collection helpers.
pub mod sentinel2;
pub use sentinel2::{BandPathMap, MetadataError, TileProduct};

pub mod gdal;
pub use gdal::{RasterError, RasterMetadata};

pub mod vector;
