//! Writes a decoded source into a tiled, multi-resolution Zarr V3 store.
//!
//! Layout under the artifact root:
//! - `0`: native resolution, shape `[bands, rows, cols]`, chunks `[1, tile, tile]`
//! - `ov{factor}`: 2x-averaged overviews, same chunking
//!
//! Only the level-0 array carries [`ArtifactMetadata`] in its attributes.

use std::sync::Arc;

use tracing::{debug, info};
use zarrs::array::codec::bytes_to_bytes::blosc::{
    BloscCodec, BloscCompressionLevel, BloscCompressor, BloscShuffleMode,
};
use zarrs::array::{Array, ArrayBuilder, DataType, FillValue};
use zarrs::array_subset::ArraySubset;
use zarrs::storage::{ReadableStorageTraits, WritableStorageTraits};

use crate::artifact::{array_path, ArtifactMetadata, OverviewLevel, FORMAT_VERSION, LEVEL0_PATH};
use crate::config::{RasterConfig, ZarrCompression};
use crate::downsample::downsample_2x_mean;
use crate::error::{RasterError, Result};
use crate::source::GeoTiffSource;

/// Result of writing a pyramid.
#[derive(Debug)]
pub struct PyramidWriteResult {
    pub metadata: ArtifactMetadata,
    /// Uncompressed bytes written across all levels.
    pub bytes_written: u64,
    /// Number of arrays written, level 0 included.
    pub levels: usize,
}

/// Writer for tiled raster pyramids.
pub struct PyramidWriter {
    config: RasterConfig,
}

impl PyramidWriter {
    pub fn new(config: RasterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RasterConfig {
        &self.config
    }

    /// Convert every band of `source` into the store rooted at `/`.
    pub fn write<S: ReadableStorageTraits + WritableStorageTraits + 'static>(
        &self,
        store: Arc<S>,
        source: &mut GeoTiffSource,
    ) -> Result<PyramidWriteResult> {
        self.config.validate().map_err(RasterError::Config)?;

        let (width, height) = (source.width(), source.height());
        let band_count = source.band_count();
        let overviews = plan_overviews(&self.config.overview_factors, width, height);

        let metadata = ArtifactMetadata {
            format_version: FORMAT_VERSION,
            width,
            height,
            bands: source.band_names().to_vec(),
            epsg: source.epsg(),
            geotransform: source.geotransform(),
            tile_size: self.config.tile_size,
            overviews: overviews.clone(),
            compression: self.config.compression.as_str().to_string(),
            source_nodata: source.nodata().filter(|v| v.is_finite()),
        };

        let level0 = self.build_array(
            store.clone(),
            &array_path("", LEVEL0_PATH),
            band_count,
            width,
            height,
            Some(metadata.to_attributes()?),
        )?;
        let overview_arrays = overviews
            .iter()
            .map(|ov| {
                self.build_array(
                    store.clone(),
                    &array_path("", &ov.path),
                    band_count,
                    ov.width,
                    ov.height,
                    None,
                )
            })
            .collect::<Result<Vec<_>>>()?;

        let mut bytes_written = 0u64;
        for band in 0..band_count {
            let data = source.read_band(band)?;
            bytes_written += store_band(&level0, band, &data, width, height)?;

            // Walk the 2x chain once per band, storing the requested factors.
            let mut current = data;
            let (mut w, mut h) = (width, height);
            let mut factor = 1u32;
            for (ov, array) in overviews.iter().zip(&overview_arrays) {
                while factor < ov.factor {
                    let (next, nw, nh) = downsample_2x_mean(&current, w, h);
                    current = next;
                    w = nw;
                    h = nh;
                    factor *= 2;
                }
                bytes_written += store_band(array, band, &current, w, h)?;
            }

            debug!(band = band, name = %metadata.bands[band], "Wrote band");
        }

        info!(
            width = width,
            height = height,
            bands = band_count,
            overviews = overviews.len(),
            bytes = bytes_written,
            "Wrote raster pyramid"
        );

        Ok(PyramidWriteResult {
            metadata,
            bytes_written,
            levels: overviews.len() + 1,
        })
    }

    /// Create one level array and store its metadata document.
    fn build_array<S: ReadableStorageTraits + WritableStorageTraits + ?Sized + 'static>(
        &self,
        store: Arc<S>,
        path: &str,
        bands: usize,
        width: usize,
        height: usize,
        attributes: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<Array<S>> {
        let tile = self.config.tile_size as u64;
        let chunk_grid: zarrs::array::ChunkGrid = vec![1u64, tile, tile]
            .try_into()
            .map_err(|e| RasterError::Config(format!("{:?}", e)))?;

        let mut binding = ArrayBuilder::new(
            vec![bands as u64, height as u64, width as u64],
            DataType::Float32,
            chunk_grid,
            FillValue::from(f32::NAN),
        );
        let mut builder = &mut binding;
        if let Some(attrs) = attributes {
            builder = builder.attributes(attrs);
        }
        if self.config.compression != ZarrCompression::None {
            builder = builder.bytes_to_bytes_codecs(vec![self.create_compression_codec()?]);
        }

        let array = builder
            .build(store, path)
            .map_err(|e| RasterError::write(e.to_string()))?;
        array
            .store_metadata()
            .map_err(|e| RasterError::write(e.to_string()))?;
        Ok(array)
    }

    fn create_compression_codec(
        &self,
    ) -> Result<Arc<dyn zarrs::array::codec::BytesToBytesCodecTraits>> {
        let level = BloscCompressionLevel::try_from(self.config.compression_level)
            .map_err(|_| RasterError::Config("invalid compression level".to_string()))?;

        let shuffle = if self.config.shuffle {
            BloscShuffleMode::Shuffle
        } else {
            BloscShuffleMode::NoShuffle
        };
        // typesize is required when shuffle is enabled
        let typesize = self.config.shuffle.then_some(std::mem::size_of::<f32>());

        let compressor = match self.config.compression {
            ZarrCompression::None => {
                return Err(RasterError::Config("no compression configured".to_string()))
            }
            ZarrCompression::BloscLz4 => BloscCompressor::LZ4,
            ZarrCompression::BloscZstd => BloscCompressor::Zstd,
        };

        let codec = BloscCodec::new(compressor, level, None, shuffle, typesize)
            .map_err(|e| RasterError::Config(e.to_string()))?;
        Ok(Arc::new(codec))
    }
}

/// Overview levels for the configured factors, stopping once a level is 1x1.
fn plan_overviews(factors: &[u32], width: usize, height: usize) -> Vec<OverviewLevel> {
    let mut levels = Vec::new();
    if width <= 1 && height <= 1 {
        return levels;
    }

    let (mut w, mut h) = (width, height);
    let mut factor = 1u32;
    for &target in factors {
        while factor < target {
            w = w.div_ceil(2);
            h = h.div_ceil(2);
            factor *= 2;
        }
        levels.push(OverviewLevel {
            factor: target,
            path: format!("ov{}", target),
            width: w,
            height: h,
        });
        if w == 1 && h == 1 {
            break;
        }
    }
    levels
}

fn store_band<S: ReadableStorageTraits + WritableStorageTraits + 'static>(
    array: &Array<S>,
    band: usize,
    data: &[f32],
    width: usize,
    height: usize,
) -> Result<u64> {
    let subset = ArraySubset::new_with_start_shape(
        vec![band as u64, 0, 0],
        vec![1, height as u64, width as u64],
    )
    .map_err(|e| RasterError::write(e.to_string()))?;
    array
        .store_array_subset_elements(&subset, data)
        .map_err(|e| RasterError::write(e.to_string()))?;
    Ok((data.len() * std::mem::size_of::<f32>()) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_overviews_default_factors() {
        let levels = plan_overviews(&[2, 4, 8, 16], 1000, 600);
        let dims: Vec<_> = levels.iter().map(|l| (l.factor, l.width, l.height)).collect();
        assert_eq!(dims, vec![(2, 500, 300), (4, 250, 150), (8, 125, 75), (16, 63, 38)]);
        assert_eq!(levels[0].path, "ov2");
    }

    #[test]
    fn test_plan_overviews_stops_at_single_pixel() {
        let levels = plan_overviews(&[2, 4, 8, 16], 3, 2);
        let dims: Vec<_> = levels.iter().map(|l| (l.factor, l.width, l.height)).collect();
        assert_eq!(dims, vec![(2, 2, 1), (4, 1, 1)]);

        assert!(plan_overviews(&[2, 4], 1, 1).is_empty());
    }

    #[test]
    fn test_plan_overviews_skipped_factor() {
        let levels = plan_overviews(&[4], 9, 9);
        assert_eq!(levels.len(), 1);
        assert_eq!((levels[0].width, levels[0].height), (3, 3));
    }
}
