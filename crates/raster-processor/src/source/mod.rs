//! Source raster readers.

mod geotiff;

pub use geotiff::{parse_gdal_band_descriptions, GeoTiffSource};
