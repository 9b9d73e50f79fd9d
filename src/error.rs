//! Crate-level error type and `Result` alias for stable, structured error handling.
//! Converts underlying I/O, metadata, and raster errors, and provides semantic
//! variants for configuration, external-process, and shape failures.
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("metadata error: {0}")]
    Metadata(#[from] crate::io::sentinel2::MetadataError),

    #[error("raster I/O error: {0}")]
    Raster(#[from] crate::io::gdal::RasterError),

    #[error("external process `{tool}` exited with status {status}")]
    ExternalProcess { tool: String, status: i32 },

    #[error(
        "dimension mismatch: expected {expected_rows}x{expected_cols}, got {rows}x{cols}"
    )]
    DimensionMismatch {
        expected_rows: usize,
        expected_cols: usize,
        rows: usize,
        cols: usize,
    },

    #[error("processing error: {0}")]
    Processing(String),

    #[error("{count} tile(s) failed to process")]
    TilesFailed { count: usize },
}
