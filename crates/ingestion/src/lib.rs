//! Raster and tabular ingestion.
//!
//! Provides core logic for turning uploaded data into cataloged entities:
//!
//! - GeoTIFF conversion into tiled Zarr pyramids
//! - Upload to object storage (MinIO/S3, local filesystem)
//! - Catalog registration of the converted asset
//! - Bulk imports of zone boundaries, zone statistics and yield observations

pub mod config;
pub mod error;
pub mod imports;
pub mod metadata;
mod ingester;
mod upload;

// Re-exports
pub use config::IngestConfig;
pub use imports::{import_observations, import_zone_boundaries, import_zone_statistics, ImportSummary};
pub use ingester::{IngestReceipt, RasterCatalogIngestor};
pub use metadata::IngestMetadata;
pub use upload::{upload_with_remediation, upload_zarr_directory};
