//! Configuration for raster conversion.

use serde::{Deserialize, Serialize};

/// Configuration for the pyramid writer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RasterConfig {
    /// Tile edge length for Zarr chunks (square tiles).
    pub tile_size: usize,

    /// Overview decimation factors, increasing powers of two.
    pub overview_factors: Vec<u32>,

    /// Compression codec for Zarr chunks.
    pub compression: ZarrCompression,

    /// Compression level (1-9).
    pub compression_level: u8,

    /// Enable byte shuffle filter for better compression.
    pub shuffle: bool,
}

impl Default for RasterConfig {
    fn default() -> Self {
        Self {
            tile_size: 256,
            overview_factors: vec![2, 4, 8, 16],
            compression: ZarrCompression::BloscZstd,
            compression_level: 5,
            shuffle: true,
        }
    }
}

impl RasterConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("RASTER_TILE_SIZE") {
            if let Ok(size) = val.parse() {
                config.tile_size = size;
            }
        }

        if let Ok(val) = std::env::var("RASTER_OVERVIEW_FACTORS") {
            let factors: Option<Vec<u32>> = val
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(|s| s.trim().parse().ok())
                .collect();
            if let Some(factors) = factors {
                config.overview_factors = factors;
            }
        }

        if let Ok(val) = std::env::var("RASTER_COMPRESSION") {
            config.compression = ZarrCompression::from_str(&val);
        }

        if let Ok(val) = std::env::var("RASTER_COMPRESSION_LEVEL") {
            if let Ok(level) = val.parse() {
                config.compression_level = level;
            }
        }

        if let Ok(val) = std::env::var("RASTER_SHUFFLE") {
            config.shuffle = val.to_lowercase() == "true" || val == "1";
        }

        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.tile_size == 0 {
            return Err("tile_size must be > 0".to_string());
        }

        if self.compression_level == 0 || self.compression_level > 9 {
            return Err("compression_level must be 1-9".to_string());
        }

        let mut previous = 1u32;
        for &factor in &self.overview_factors {
            if factor < 2 || !factor.is_power_of_two() {
                return Err(format!("overview factor {} is not a power of two >= 2", factor));
            }
            if factor <= previous {
                return Err("overview factors must be strictly increasing".to_string());
            }
            previous = factor;
        }

        Ok(())
    }
}

/// Lossless compression codec for Zarr chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ZarrCompression {
    /// No compression.
    None,
    /// Blosc with LZ4.
    BloscLz4,
    /// Blosc with Zstd (recommended).
    #[default]
    BloscZstd,
}

impl ZarrCompression {
    /// Parse from string (case-insensitive).
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "none" | "uncompressed" => Self::None,
            "lz4" | "blosc_lz4" | "blosclz4" => Self::BloscLz4,
            _ => Self::BloscZstd,
        }
    }

    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::BloscLz4 => "blosc_lz4",
            Self::BloscZstd => "blosc_zstd",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = RasterConfig::default();
        assert_eq!(config.tile_size, 256);
        assert_eq!(config.overview_factors, vec![2, 4, 8, 16]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overview_factor_validation() {
        let mut config = RasterConfig::default();
        config.overview_factors = vec![2, 3];
        assert!(config.validate().is_err());

        config.overview_factors = vec![4, 2];
        assert!(config.validate().is_err());

        config.overview_factors = vec![];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_compression_from_str() {
        assert_eq!(ZarrCompression::from_str("NONE"), ZarrCompression::None);
        assert_eq!(ZarrCompression::from_str("lz4"), ZarrCompression::BloscLz4);
        assert_eq!(ZarrCompression::from_str("zstd"), ZarrCompression::BloscZstd);
    }
}
