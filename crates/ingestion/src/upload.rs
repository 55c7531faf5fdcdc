//! Zarr directory upload utilities.

use std::future::Future;
use std::path::Path;

use bytes::Bytes;
use tracing::{debug, warn};

use dss_common::{DssError, DssResult};
use storage::ObjectStorage;

use crate::error::scratch_error;

/// Upload a Zarr directory to object storage.
///
/// Recursively walks the local Zarr directory and uploads all files
/// under `storage_prefix`.
///
/// # Returns
/// Total bytes uploaded
pub async fn upload_zarr_directory(
    storage: &ObjectStorage,
    local_path: &Path,
    storage_prefix: &str,
) -> DssResult<u64> {
    let mut total_size = 0u64;

    for entry in walkdir::WalkDir::new(local_path).sort_by_file_name() {
        let entry = entry.map_err(|e| DssError::Storage(e.to_string()))?;

        if entry.file_type().is_file() {
            let relative_path = entry
                .path()
                .strip_prefix(local_path)
                .map_err(|e| DssError::Storage(e.to_string()))?;
            let relative_key: Vec<String> = relative_path
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();

            let storage_path = format!(
                "{}/{}",
                storage_prefix.trim_end_matches('/'),
                relative_key.join("/")
            );

            let file_data = tokio::fs::read(entry.path())
                .await
                .map_err(|e| scratch_error("Failed to read converted artifact", e))?;
            let file_size = file_data.len() as u64;
            total_size += file_size;

            storage.put(&storage_path, Bytes::from(file_data)).await?;

            debug!(path = %storage_path, size = file_size, "Uploaded Zarr file");
        }
    }

    Ok(total_size)
}

/// Upload, creating the container and retrying once if it is missing.
///
/// Only a local root is created here. A missing S3 bucket, any other
/// failure, or a second missing-container failure is surfaced as a storage
/// error.
pub async fn upload_with_remediation(
    storage: &ObjectStorage,
    local_path: &Path,
    storage_prefix: &str,
) -> DssResult<u64> {
    with_container_remediation(storage, || {
        upload_zarr_directory(storage, local_path, storage_prefix)
    })
    .await
}

async fn with_container_remediation<F, Fut>(storage: &ObjectStorage, attempt: F) -> DssResult<u64>
where
    F: Fn() -> Fut,
    Fut: Future<Output = DssResult<u64>>,
{
    match attempt().await {
        Err(DssError::ContainerMissing(detail)) if !storage.can_create_container() => {
            warn!(detail = %detail, container = %storage.container(), "Storage container missing and cannot be created here");
            Err(DssError::Storage(format!(
                "Container '{}' is missing and must be provisioned: {}",
                storage.container(),
                detail
            )))
        }
        Err(DssError::ContainerMissing(detail)) => {
            warn!(detail = %detail, "Storage container missing, creating it and retrying once");
            storage.create_container().await?;
            attempt().await.map_err(|e| match e {
                DssError::ContainerMissing(d) => {
                    DssError::Storage(format!("Container still missing after creation: {}", d))
                }
                other => other,
            })
        }
        other => other,
    }
}
