//! Storage abstractions for the crop decision-support backend.
//!
//! Provides unified interfaces for:
//! - Object storage (MinIO/S3, local filesystem, in-memory) for raster artifacts
//! - The spatial catalog of assets, zones and observations (PostGIS or in-memory)

pub mod catalog;
pub mod object_store;

pub use self::object_store::{ObjectStorage, ObjectStorageConfig, StorageBackend, StoragePath};
pub use catalog::{
    CatalogConfig, MemoryCatalog, PostgisCatalog, SpatialCatalog, ZoneYear,
};
