//! Round-trip properties of the raster adapter: a written raster reads
//! back with identical values and dimensions, and nodata is 0 regardless
//! of what the caller supplied.

use approx::assert_abs_diff_eq;
use gdal::raster::GdalDataType;
use ndarray::array;

use s2ard::io::gdal::{RasterMetadata, read_band, read_metadata, write_image};

fn meta(width: usize, height: usize, bands: usize, dtype: GdalDataType) -> RasterMetadata {
    RasterMetadata {
        band_count: bands,
        geotransform: [600_000.0, 10.0, 0.0, 5_700_000.0, 0.0, -10.0],
        projection: String::new(),
        epsg: None,
        width,
        height,
        dtype,
        // deliberately not 0; the writer must ignore it
        nodata: -9999.0,
    }
}

#[test]
fn write_then_read_round_trip() {
    let scratch = tempfile::tempdir().unwrap();
    let path = scratch.path().join("roundtrip.tif");

    let data = array![[1.5, 2.5], [3.5, 4.5]];
    write_image(&path, "GTiff", &meta(2, 2, 1, GdalDataType::Float32), &[data.clone()]).unwrap();

    let read_meta = read_metadata(&path).unwrap();
    assert_eq!(read_meta.width, 2);
    assert_eq!(read_meta.height, 2);
    assert_eq!(read_meta.band_count, 1);
    assert_eq!(read_meta.nodata, 0.0);
    assert_abs_diff_eq!(read_meta.pixel_size(), 10.0);

    let values = read_band(&path, 1).unwrap();
    assert_eq!(values.dim(), (2, 2));
    for (expected, actual) in data.iter().zip(values.iter()) {
        assert_abs_diff_eq!(*expected, *actual);
    }
}

#[test]
fn multiband_write_preserves_band_order() {
    let scratch = tempfile::tempdir().unwrap();
    let path = scratch.path().join("stacked.tif");

    let band1 = array![[100.0, 200.0], [300.0, 400.0]];
    let band2 = array![[5.0, 6.0], [7.0, 8.0]];
    write_image(
        &path,
        "GTiff",
        &meta(2, 2, 2, GdalDataType::UInt16),
        &[band1.clone(), band2.clone()],
    )
    .unwrap();

    let read_meta = read_metadata(&path).unwrap();
    assert_eq!(read_meta.band_count, 2);
    assert_eq!(read_band(&path, 1).unwrap(), band1);
    assert_eq!(read_band(&path, 2).unwrap(), band2);
}

#[test]
fn write_rejects_inconsistent_metadata() {
    let scratch = tempfile::tempdir().unwrap();
    let path = scratch.path().join("bad.tif");

    let data = array![[1.0, 2.0], [3.0, 4.0]];
    // declared band count disagrees with the array list
    assert!(write_image(&path, "GTiff", &meta(2, 2, 2, GdalDataType::Float32), &[data.clone()]).is_err());
    // declared size disagrees with the array shape
    assert!(write_image(&path, "GTiff", &meta(3, 3, 1, GdalDataType::Float32), &[data]).is_err());
}
