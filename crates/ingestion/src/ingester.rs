//! Raster ingestion: convert, upload, register.

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use geo::Polygon;
use tracing::{debug, info, warn};
use uuid::Uuid;
use zarrs_filesystem::FilesystemStore;

use dss_common::{DssError, DssResult, NewRasterAsset};
use raster_processor::{ArtifactMetadata, GeoTiffSource, PyramidWriter, RasterConfig, RasterError};
use storage::{ObjectStorage, SpatialCatalog, StoragePath};

use crate::config::IngestConfig;
use crate::error::{conversion_error, scratch_error};
use crate::metadata::IngestMetadata;
use crate::upload::upload_with_remediation;

/// Outcome of a successful ingestion.
#[derive(Debug, Clone)]
pub struct IngestReceipt {
    pub asset_url: String,
    pub asset_id: Uuid,
    /// Object storage key of the artifact root
    pub key: String,
    /// Band names as registered
    pub bands: Vec<String>,
    pub bytes_uploaded: u64,
}

/// What conversion produced, read back from the written artifact.
struct ConvertedArtifact {
    metadata: ArtifactMetadata,
    footprint: Polygon<f64>,
    bytes_written: u64,
}

/// Converts uploaded rasters into tiled artifacts and catalogs them.
///
/// Each call works in its own scratch directory, so independent ingestions
/// may run concurrently.
pub struct RasterCatalogIngestor {
    storage: Arc<ObjectStorage>,
    catalog: Arc<dyn SpatialCatalog>,
    config: IngestConfig,
}

impl RasterCatalogIngestor {
    pub fn new(
        storage: Arc<ObjectStorage>,
        catalog: Arc<dyn SpatialCatalog>,
        config: IngestConfig,
    ) -> Self {
        Self {
            storage,
            catalog,
            config,
        }
    }

    /// Ingest raw GeoTIFF bytes.
    ///
    /// The asset is registered only after the upload succeeds. If
    /// registration fails the uploaded artifact stays in storage unreferenced.
    /// An existing artifact key is never overwritten.
    pub async fn ingest(&self, data: Bytes, metadata: IngestMetadata) -> DssResult<IngestReceipt> {
        let captured_at = metadata.validate()?;
        if data.is_empty() {
            return Err(DssError::Validation("Raster payload is empty".to_string()));
        }

        info!(
            asset_type = %metadata.asset_type,
            filename = %metadata.filename,
            size = data.len(),
            "Ingesting raster"
        );

        let key = StoragePath::raster_artifact(&metadata.asset_type, captured_at, &metadata.filename);
        if self.artifact_exists(&key).await? {
            return Err(DssError::Validation(format!(
                "An artifact already exists at {}; ingest under a different filename",
                key
            )));
        }

        // Removed on drop, whichever way this function returns.
        let scratch = self.scratch_dir()?;
        let source_path = scratch.path().join("source.tif");
        let zarr_path = scratch.path().join("artifact.zarr");

        tokio::fs::write(&source_path, &data)
            .await
            .map_err(|e| scratch_error("Failed to stage source raster", e))?;
        tokio::fs::create_dir_all(&zarr_path)
            .await
            .map_err(|e| scratch_error("Failed to create artifact directory", e))?;

        let raster_config = self.config.raster.clone();
        let (src, dst) = (source_path.clone(), zarr_path.clone());
        let converted = tokio::task::spawn_blocking(move || convert(&src, &dst, raster_config))
            .await
            .map_err(|e| DssError::Conversion(format!("Conversion task failed: {}", e)))?
            .map_err(conversion_error)?;

        debug!(
            bands = converted.metadata.bands.len(),
            epsg = converted.metadata.epsg,
            bytes = converted.bytes_written,
            "Converted raster"
        );

        let bytes_uploaded = upload_with_remediation(&self.storage, &zarr_path, &key).await?;
        let asset_url = self.storage.url_for(&key);

        let asset = self
            .catalog
            .register_asset(NewRasterAsset {
                url: asset_url.clone(),
                captured_at,
                asset_type: metadata.asset_type.trim().to_string(),
                crop_id: metadata.crop_id.clone(),
                footprint: converted.footprint,
                bands: converted.metadata.bands.clone(),
            })
            .await
            .map_err(|e| {
                warn!(key = %key, error = %e, "Catalog registration failed, uploaded artifact is unreferenced");
                e
            })?;

        info!(
            asset_id = %asset.id,
            asset_type = %asset.asset_type,
            key = %key,
            bands = asset.bands.len(),
            bytes = bytes_uploaded,
            "Ingested raster"
        );

        Ok(IngestReceipt {
            asset_url,
            asset_id: asset.id,
            key,
            bands: asset.bands,
            bytes_uploaded,
        })
    }

    /// A missing container holds no artifacts yet.
    async fn artifact_exists(&self, key: &str) -> DssResult<bool> {
        match self.storage.list(key).await {
            Ok(keys) => Ok(!keys.is_empty()),
            Err(DssError::ContainerMissing(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn scratch_dir(&self) -> DssResult<tempfile::TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("dss-ingest-");
        let result = match &self.config.scratch_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        };
        result.map_err(|e| scratch_error("Failed to create scratch directory", e))
    }

    pub fn storage(&self) -> &Arc<ObjectStorage> {
        &self.storage
    }

    pub fn catalog(&self) -> &Arc<dyn SpatialCatalog> {
        &self.catalog
    }
}

/// Convert and then derive footprint and bands from the written artifact.
fn convert(
    source_path: &Path,
    zarr_path: &Path,
    config: RasterConfig,
) -> Result<ConvertedArtifact, RasterError> {
    let mut source = GeoTiffSource::open(source_path)?;
    let store = Arc::new(
        FilesystemStore::new(zarr_path)
            .map_err(|e| RasterError::write(format!("Failed to create filesystem store: {}", e)))?,
    );

    let result = PyramidWriter::new(config).write(store.clone(), &mut source)?;
    drop(source);

    let metadata = ArtifactMetadata::read(store, "")?;
    let footprint = metadata.footprint()?;

    Ok(ConvertedArtifact {
        metadata,
        footprint,
        bytes_written: result.bytes_written,
    })
}
