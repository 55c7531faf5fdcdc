//! Ingestion configuration.

use std::path::PathBuf;

use raster_processor::RasterConfig;

/// Settings for the raster ingestion pipeline.
#[derive(Debug, Clone, Default)]
pub struct IngestConfig {
    /// Tiling, overview and compression settings for converted artifacts.
    pub raster: RasterConfig,
    /// Parent directory for per-request scratch directories (system temp if unset).
    pub scratch_root: Option<PathBuf>,
}

impl IngestConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            raster: RasterConfig::from_env(),
            scratch_root: std::env::var("DSS_SCRATCH_DIR").ok().map(PathBuf::from),
        }
    }
}
