//! Raster conversion and sampling.
//!
//! Source GeoTIFFs are decoded one band at a time and written into a Zarr V3
//! pyramid: a native-resolution array of shape `[bands, rows, cols]` in
//! 256x256 tiles plus 2x-averaged overview arrays. The artifact carries its own
//! georeferencing in the level-0 attributes so footprints and point reads
//! depend only on what was written.

pub mod artifact;
pub mod config;
pub mod downsample;
pub mod error;
pub mod geotransform;
pub mod sampler;
pub mod source;
pub mod writer;

pub use artifact::{ArtifactMetadata, OverviewLevel, LEVEL0_PATH};
pub use config::{RasterConfig, ZarrCompression};
pub use downsample::downsample_2x_mean;
pub use error::{RasterError, Result};
pub use geotransform::GeoTransform;
pub use sampler::{PointSample, PointSampler};
pub use source::GeoTiffSource;
pub use writer::{PyramidWriteResult, PyramidWriter};
