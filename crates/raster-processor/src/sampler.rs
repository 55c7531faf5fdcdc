//! Windowed point reads from stored artifacts.
//!
//! Only the chunk holding the requested pixel is fetched for each band; the
//! artifact is never downloaded in full.

use std::sync::Arc;

use object_store::ObjectStore;
use tokio::runtime::Handle;
use tracing::debug;
use zarrs::array::Array;
use zarrs::array_subset::ArraySubset;
use zarrs_object_store::AsyncObjectStore;
use zarrs_storage::storage_adapter::async_to_sync::{
    AsyncToSyncBlockOn, AsyncToSyncStorageAdapter,
};

use dss_common::GeoPoint;

use crate::artifact::{level0_path, ArtifactMetadata};
use crate::error::{RasterError, Result};

/// Drives async storage reads from a blocking thread.
///
/// Must only be used off the async worker threads (e.g. in `spawn_blocking`),
/// which is what lets it run on a current-thread runtime too.
#[derive(Clone)]
pub struct HandleBlockOn(Handle);

impl AsyncToSyncBlockOn for HandleBlockOn {
    fn block_on<F: core::future::Future>(&self, future: F) -> F::Output {
        self.0.block_on(future)
    }
}

/// Band values at one pixel.
#[derive(Debug, Clone, PartialEq)]
pub struct PointSample {
    /// One entry per band; nodata reads back as `None`.
    pub values: Vec<Option<f64>>,
    pub bands: Vec<String>,
    pub row: u64,
    pub col: u64,
}

impl PointSample {
    /// Value of a band by name.
    pub fn value(&self, band: &str) -> Option<f64> {
        self.bands
            .iter()
            .position(|b| b == band)
            .and_then(|i| self.values[i])
    }
}

/// Point sampler over artifacts in an object store.
#[derive(Clone)]
pub struct PointSampler {
    store: Arc<dyn ObjectStore>,
}

impl PointSampler {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Sample every band of the artifact at `key` at a WGS84 point.
    pub async fn sample(&self, key: &str, point: GeoPoint) -> Result<PointSample> {
        let store = self.store.clone();
        let key = key.trim_matches('/').to_string();
        let handle = Handle::current();

        tokio::task::spawn_blocking(move || sample_blocking(store, handle, &key, point))
            .await
            .map_err(|e| RasterError::read(format!("sampling task failed: {}", e)))?
    }
}

fn sample_blocking(
    store: Arc<dyn ObjectStore>,
    handle: Handle,
    key: &str,
    point: GeoPoint,
) -> Result<PointSample> {
    let async_store = Arc::new(AsyncObjectStore::new(store));
    let sync_store = Arc::new(AsyncToSyncStorageAdapter::new(
        async_store,
        HandleBlockOn(handle),
    ));

    let array = Array::open(sync_store, &level0_path(key))
        .map_err(|e| RasterError::read(format!("cannot open artifact '{}': {}", key, e)))?;
    let metadata = ArtifactMetadata::from_array(&array)?;
    let (row, col) = metadata.locate(point)?;

    let band_count = metadata.bands.len() as u64;
    let subset = ArraySubset::new_with_start_shape(vec![0, row, col], vec![band_count, 1, 1])
        .map_err(|e| RasterError::read(e.to_string()))?;
    let raw: Vec<f32> = array
        .retrieve_array_subset_elements(&subset)
        .map_err(|e| RasterError::read(e.to_string()))?;

    debug!(key = %key, row = row, col = col, "Sampled artifact");

    Ok(PointSample {
        values: raw
            .into_iter()
            .map(|v| if v.is_nan() { None } else { Some(v as f64) })
            .collect(),
        bands: metadata.bands,
        row,
        col,
    })
}
