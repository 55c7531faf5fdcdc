//! Error types for raster conversion and sampling.

use thiserror::Error;

/// Errors that can occur while decoding, writing or reading rasters.
#[derive(Error, Debug)]
pub enum RasterError {
    /// The source file could not be decoded.
    #[error("failed to decode raster: {0}")]
    Decode(String),

    /// Georeferencing tags are missing or unusable.
    #[error("invalid georeferencing: {0}")]
    Georeference(String),

    /// Writing the tiled artifact failed.
    #[error("failed to write artifact: {0}")]
    Write(String),

    /// Reading the tiled artifact failed.
    #[error("failed to read artifact: {0}")]
    Read(String),

    /// Artifact attributes are missing or inconsistent.
    #[error("invalid artifact metadata: {0}")]
    InvalidMetadata(String),

    /// Coordinate transformation failed.
    #[error("projection error: {0}")]
    Projection(String),

    /// Point falls outside the raster extent.
    #[error("point ({lon}, {lat}) is outside the raster extent")]
    OutsideExtent { lon: f64, lat: f64 },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl RasterError {
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn write(msg: impl Into<String>) -> Self {
        Self::Write(msg.into())
    }

    pub fn read(msg: impl Into<String>) -> Self {
        Self::Read(msg.into())
    }

    pub fn invalid_metadata(msg: impl Into<String>) -> Self {
        Self::InvalidMetadata(msg.into())
    }
}

impl From<tiff::TiffError> for RasterError {
    fn from(e: tiff::TiffError) -> Self {
        RasterError::Decode(e.to_string())
    }
}

impl From<projection::ProjectionError> for RasterError {
    fn from(e: projection::ProjectionError) -> Self {
        RasterError::Projection(e.to_string())
    }
}

/// Result type for raster operations.
pub type Result<T> = std::result::Result<T, RasterError>;
