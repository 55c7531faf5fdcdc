//! Object storage interface for raster artifacts (MinIO/S3, local disk, memory).

use std::ops::Range;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use object_store::{
    aws::AmazonS3Builder, local::LocalFileSystem, memory::InMemory, path::Path, ObjectStore,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use dss_common::{DssError, DssResult};

/// Which object store implementation backs the storage client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// S3-compatible service (MinIO in deployments)
    S3,
    /// Directory tree on local disk; the root directory is the container
    Local,
    /// Process-local in-memory store
    Memory,
}

impl StorageBackend {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "local" | "file" | "filesystem" => Self::Local,
            "memory" | "inmemory" => Self::Memory,
            _ => Self::S3,
        }
    }
}

/// Configuration for object storage connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectStorageConfig {
    pub backend: StorageBackend,
    /// S3/MinIO endpoint URL
    pub endpoint: String,
    /// Bucket name
    pub bucket: String,
    /// Access key ID
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: String,
    /// AWS region (use "us-east-1" for MinIO)
    pub region: String,
    /// Allow HTTP (for local MinIO)
    pub allow_http: bool,
    /// Root directory for the local backend
    pub local_root: PathBuf,
}

impl Default for ObjectStorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::S3,
            endpoint: "http://minio:9000".to_string(),
            bucket: "crop-data".to_string(),
            access_key_id: "minioadmin".to_string(),
            secret_access_key: "minioadmin".to_string(),
            region: "us-east-1".to_string(),
            allow_http: true,
            local_root: PathBuf::from("./data/objects"),
        }
    }
}

impl ObjectStorageConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            backend: std::env::var("DSS_STORAGE_BACKEND")
                .map(|v| StorageBackend::from_str(&v))
                .unwrap_or(defaults.backend),
            endpoint: std::env::var("S3_ENDPOINT").unwrap_or(defaults.endpoint),
            bucket: std::env::var("S3_BUCKET").unwrap_or(defaults.bucket),
            access_key_id: std::env::var("S3_ACCESS_KEY").unwrap_or(defaults.access_key_id),
            secret_access_key: std::env::var("S3_SECRET_KEY")
                .unwrap_or(defaults.secret_access_key),
            region: std::env::var("S3_REGION").unwrap_or(defaults.region),
            allow_http: std::env::var("S3_ALLOW_HTTP")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.allow_http),
            local_root: std::env::var("DSS_STORAGE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.local_root),
        }
    }

    /// Local backend rooted at `root`.
    pub fn local(root: impl Into<PathBuf>) -> Self {
        Self {
            backend: StorageBackend::Local,
            local_root: root.into(),
            ..Self::default()
        }
    }

    /// In-memory backend, mainly for tests.
    pub fn memory() -> Self {
        Self {
            backend: StorageBackend::Memory,
            ..Self::default()
        }
    }
}

enum Backend {
    Shared(Arc<dyn ObjectStore>),
    /// Built per call so a missing root surfaces as a missing container
    Local(PathBuf),
}

/// Object storage client for raster artifacts.
pub struct ObjectStorage {
    backend: Backend,
    config: ObjectStorageConfig,
}

impl ObjectStorage {
    /// Create a new object storage client from config.
    pub fn new(config: &ObjectStorageConfig) -> DssResult<Self> {
        let backend = match config.backend {
            StorageBackend::S3 => {
                let mut builder = AmazonS3Builder::new()
                    .with_endpoint(&config.endpoint)
                    .with_bucket_name(&config.bucket)
                    .with_access_key_id(&config.access_key_id)
                    .with_secret_access_key(&config.secret_access_key)
                    .with_region(&config.region);

                if config.allow_http {
                    builder = builder.with_allow_http(true);
                }

                let store = builder.build().map_err(|e| {
                    DssError::Storage(format!("Failed to create S3 client: {}", e))
                })?;
                Backend::Shared(Arc::new(store))
            }
            StorageBackend::Local => Backend::Local(config.local_root.clone()),
            StorageBackend::Memory => Backend::Shared(Arc::new(InMemory::new())),
        };

        Ok(Self {
            backend,
            config: config.clone(),
        })
    }

    pub fn config(&self) -> &ObjectStorageConfig {
        &self.config
    }

    /// Name of the container (bucket or root directory).
    pub fn container(&self) -> String {
        match self.config.backend {
            StorageBackend::Local => self.config.local_root.display().to_string(),
            _ => self.config.bucket.clone(),
        }
    }

    /// Shared handle to the underlying store, e.g. for Zarr readers.
    pub fn object_store(&self) -> DssResult<Arc<dyn ObjectStore>> {
        match &self.backend {
            Backend::Shared(store) => Ok(store.clone()),
            Backend::Local(root) => {
                if !root.is_dir() {
                    return Err(DssError::ContainerMissing(format!(
                        "Storage root {} does not exist",
                        root.display()
                    )));
                }
                let store = LocalFileSystem::new_with_prefix(root).map_err(|e| {
                    DssError::Storage(format!(
                        "Failed to open storage root {}: {}",
                        root.display(),
                        e
                    ))
                })?;
                Ok(Arc::new(store))
            }
        }
    }

    /// Whether `create_container` can provision a missing container.
    ///
    /// Only the local root can be created here. S3 buckets are provisioned
    /// out of band.
    pub fn can_create_container(&self) -> bool {
        matches!(self.backend, Backend::Local(_))
    }

    /// Create the root directory if it is missing.
    ///
    /// Fails for S3, whose buckets must already exist.
    #[instrument(skip(self), fields(container = %self.container()))]
    pub async fn create_container(&self) -> DssResult<()> {
        match (&self.backend, self.config.backend) {
            (Backend::Local(root), _) => {
                tokio::fs::create_dir_all(root).await.map_err(|e| {
                    DssError::Storage(format!(
                        "Failed to create storage root {}: {}",
                        root.display(),
                        e
                    ))
                })?;
                info!("Created storage root");
                Ok(())
            }
            (_, StorageBackend::S3) => Err(DssError::Storage(format!(
                "Bucket '{}' does not exist and must be provisioned on {}",
                self.config.bucket, self.config.endpoint
            ))),
            _ => Ok(()),
        }
    }

    /// Write bytes to a key and return its URL.
    #[instrument(skip(self, data), fields(container = %self.container(), path = %path))]
    pub async fn put(&self, path: &str, data: Bytes) -> DssResult<String> {
        let location = Path::from(path);
        debug!(size = data.len(), "Writing object");

        self.object_store()?
            .put(&location, data.into())
            .await
            .map_err(|e| classify_write_error(path, e))?;

        Ok(self.url_for(path))
    }

    /// Read bytes from a key.
    #[instrument(skip(self), fields(container = %self.container(), path = %path))]
    pub async fn get(&self, path: &str) -> DssResult<Bytes> {
        let location = Path::from(path);

        let result = self
            .object_store()?
            .get(&location)
            .await
            .map_err(|e| DssError::Storage(format!("Failed to read {}: {}", path, e)))?;

        let bytes = result
            .bytes()
            .await
            .map_err(|e| DssError::Storage(format!("Failed to read bytes: {}", e)))?;

        debug!(size = bytes.len(), "Read object");
        Ok(bytes)
    }

    /// Read a byte range from a key.
    #[instrument(skip(self), fields(container = %self.container(), path = %path))]
    pub async fn get_range(&self, path: &str, range: Range<usize>) -> DssResult<Bytes> {
        let location = Path::from(path);

        self.object_store()?
            .get_range(&location, range)
            .await
            .map_err(|e| DssError::Storage(format!("Failed to read range {}: {}", path, e)))
    }

    /// Check if an object exists.
    pub async fn exists(&self, path: &str) -> DssResult<bool> {
        let location = Path::from(path);

        match self.object_store()?.head(&location).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(DssError::Storage(format!(
                "Failed to check {}: {}",
                path, e
            ))),
        }
    }

    /// List objects with a given prefix.
    pub async fn list(&self, prefix: &str) -> DssResult<Vec<String>> {
        use futures::TryStreamExt;

        let prefix_path = Path::from(prefix);
        let store = self.object_store()?;
        let mut paths = Vec::new();

        let mut stream = store.list(Some(&prefix_path));
        while let Some(meta) = stream
            .try_next()
            .await
            .map_err(|e| DssError::Storage(format!("List failed: {}", e)))?
        {
            paths.push(meta.location.to_string());
        }

        paths.sort();
        Ok(paths)
    }

    fn url_prefix(&self) -> String {
        match self.config.backend {
            StorageBackend::S3 => format!(
                "{}/{}",
                self.config.endpoint.trim_end_matches('/'),
                self.config.bucket
            ),
            StorageBackend::Local => format!(
                "file://{}",
                self.config.local_root.display().to_string().trim_end_matches('/')
            ),
            StorageBackend::Memory => format!("memory://{}", self.config.bucket),
        }
    }

    /// Public URL for a key.
    pub fn url_for(&self, key: &str) -> String {
        format!("{}/{}", self.url_prefix(), key.trim_start_matches('/'))
    }

    /// Recover the key from a URL produced by [`ObjectStorage::url_for`].
    pub fn key_for_url(&self, url: &str) -> DssResult<String> {
        let prefix = format!("{}/", self.url_prefix());
        url.strip_prefix(&prefix)
            .filter(|key| !key.is_empty())
            .map(|key| key.to_string())
            .ok_or_else(|| {
                DssError::Storage(format!(
                    "URL {} does not belong to storage container {}",
                    url,
                    self.container()
                ))
            })
    }
}

/// S3 reports a missing bucket as 404/NoSuchBucket on writes.
fn classify_write_error(path: &str, err: object_store::Error) -> DssError {
    let message = err.to_string();
    let missing = matches!(err, object_store::Error::NotFound { .. })
        || message.contains("NoSuchBucket")
        || message.contains("specified bucket does not exist");

    if missing {
        DssError::ContainerMissing(format!("Failed to write {}: {}", path, message))
    } else {
        DssError::Storage(format!("Failed to write {}: {}", path, message))
    }
}

/// Path builder for consistent storage layout.
pub struct StoragePath;

impl StoragePath {
    /// Build the key for a converted raster artifact.
    /// Format: {asset_type}/{YYYYMMDDTHHMMSSZ}/{stem}.zarr
    pub fn raster_artifact(asset_type: &str, captured_at: DateTime<Utc>, filename: &str) -> String {
        format!(
            "{}/{}/{}.zarr",
            sanitize_segment(asset_type),
            captured_at.format("%Y%m%dT%H%M%SZ"),
            sanitize_segment(file_stem(filename))
        )
    }
}

fn file_stem(filename: &str) -> &str {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    match name.rfind('.') {
        Some(idx) if idx > 0 => &name[..idx],
        _ => name,
    }
}

fn sanitize_segment(s: &str) -> String {
    let cleaned: String = s
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "unnamed".to_string()
    } else {
        cleaned
    }
}
