//! Process-wide statistical model handle.
//!
//! The artifact is loaded once on first use and then shared read-only. A
//! reload builds the new model completely and swaps the `Arc` under the write
//! lock, so readers see either the old model or the new one.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, error, info, warn};

use dss_common::DssResult;

use crate::model::{StatisticalModel, TabularRegressor};
use crate::schema::FeatureSchema;

/// Health of the statistical model.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ModelStatus {
    /// No artifact path configured
    Unconfigured,
    /// Configured but not requested yet
    NotLoaded,
    Loaded { source: String, features: usize },
    Failed { reason: String },
}

struct ModelSlot {
    model: Option<Arc<dyn TabularRegressor>>,
    status: ModelStatus,
}

/// Lazily loaded, atomically swappable model handle.
pub struct ModelCache {
    path: Option<PathBuf>,
    schema: FeatureSchema,
    init: OnceCell<()>,
    slot: RwLock<ModelSlot>,
}

impl ModelCache {
    /// A cache that loads `path` on first use. `None` means no statistical model.
    pub fn new(path: Option<PathBuf>, schema: FeatureSchema) -> Self {
        let status = if path.is_some() {
            ModelStatus::NotLoaded
        } else {
            ModelStatus::Unconfigured
        };
        Self {
            path,
            schema,
            init: OnceCell::new(),
            slot: RwLock::new(ModelSlot {
                model: None,
                status,
            }),
        }
    }

    /// A cache holding an already-built model.
    pub fn with_model(model: Arc<dyn TabularRegressor>, source: impl Into<String>) -> Self {
        let status = ModelStatus::Loaded {
            source: source.into(),
            features: model.feature_names().len(),
        };
        Self {
            path: None,
            schema: FeatureSchema::default(),
            init: OnceCell::new_with(Some(())),
            slot: RwLock::new(ModelSlot {
                model: Some(model),
                status,
            }),
        }
    }

    /// The current model, loading it on first call.
    ///
    /// `None` if no model is configured or loading failed.
    pub async fn get(&self) -> Option<Arc<dyn TabularRegressor>> {
        self.init
            .get_or_init(|| async {
                if let Some(path) = &self.path {
                    match StatisticalModel::load(path, self.schema).await {
                        Ok(model) => {
                            info!(path = %path.display(), kind = model.kind(), "Loaded statistical model");
                            self.install_initial(Arc::new(model), path.display().to_string())
                                .await;
                        }
                        Err(e) => {
                            error!(path = %path.display(), error = %e, "Statistical model unavailable");
                            let mut slot = self.slot.write().await;
                            if slot.model.is_none() {
                                slot.status = ModelStatus::Failed {
                                    reason: e.to_string(),
                                };
                            }
                        }
                    }
                }
            })
            .await;

        self.slot.read().await.model.clone()
    }

    /// Replace the model for all subsequent readers.
    pub async fn swap(&self, model: Arc<dyn TabularRegressor>, source: impl Into<String>) {
        let source = source.into();
        // A swap before first use must not be overwritten by the lazy load.
        // A load already in flight is fenced by `install_initial`.
        let _ = self.init.set(());
        info!(source = %source, "Swapping statistical model");
        self.install(model, source).await;
    }

    /// Reload from the configured path. On failure the current model stays.
    pub async fn reload(&self) -> DssResult<()> {
        let Some(path) = &self.path else {
            warn!("Model reload requested but no model path is configured");
            return Ok(());
        };
        let model = StatisticalModel::load(path, self.schema).await?;
        self.swap(Arc::new(model), path.display().to_string()).await;
        Ok(())
    }

    pub async fn status(&self) -> ModelStatus {
        self.slot.read().await.status.clone()
    }

    /// Install the lazily loaded model unless a swap got there first.
    async fn install_initial(&self, model: Arc<dyn TabularRegressor>, source: String) -> bool {
        let features = model.feature_names().len();
        let mut slot = self.slot.write().await;
        if slot.model.is_some() {
            debug!(source = %source, "Model already swapped in, discarding lazy load");
            return false;
        }
        slot.model = Some(model);
        slot.status = ModelStatus::Loaded { source, features };
        true
    }

    async fn install(&self, model: Arc<dyn TabularRegressor>, source: String) {
        let features = model.feature_names().len();
        let mut slot = self.slot.write().await;
        slot.model = Some(model);
        slot.status = ModelStatus::Loaded { source, features };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINEAR_JSON: &str = r#"{
        "feature_names": ["ndvi_mean", "precip_mean", "et_mean", "elevation_mean", "soil_texture", "temp_mean"],
        "model": { "type": "linear", "intercept": 2.0, "coefficients": [0, 0, 0, 0, 0, 0] }
    }"#;

    fn constant_model(value: f64) -> Arc<dyn TabularRegressor> {
        let json = LINEAR_JSON.replace("\"intercept\": 2.0", &format!("\"intercept\": {:?}", value));
        Arc::new(StatisticalModel::from_json(&json, FeatureSchema::V1).unwrap())
    }

    #[tokio::test]
    async fn test_unconfigured_cache_has_no_model() {
        let cache = ModelCache::new(None, FeatureSchema::V1);
        assert!(cache.get().await.is_none());
        assert_eq!(cache.status().await, ModelStatus::Unconfigured);
    }

    #[tokio::test]
    async fn test_lazy_load_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        std::fs::write(&path, LINEAR_JSON).unwrap();

        let cache = ModelCache::new(Some(path), FeatureSchema::V1);
        assert_eq!(cache.status().await, ModelStatus::NotLoaded);

        let model = cache.get().await.unwrap();
        assert_eq!(model.predict(&[vec![0.0; 6]]).unwrap(), vec![2.0]);
        assert!(matches!(cache.status().await, ModelStatus::Loaded { features: 6, .. }));
    }

    #[tokio::test]
    async fn test_missing_artifact_fails_once() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ModelCache::new(Some(dir.path().join("absent.json")), FeatureSchema::V1);
        assert!(cache.get().await.is_none());
        assert!(matches!(cache.status().await, ModelStatus::Failed { .. }));

        // Writing the file afterwards has no effect until an explicit reload.
        std::fs::write(dir.path().join("absent.json"), LINEAR_JSON).unwrap();
        assert!(cache.get().await.is_none());
        cache.reload().await.unwrap();
        assert!(cache.get().await.is_some());
    }

    #[tokio::test]
    async fn test_swap_is_seen_by_later_readers() {
        let cache = ModelCache::with_model(constant_model(1.0), "first");
        let before = cache.get().await.unwrap();

        cache.swap(constant_model(5.0), "second").await;
        let after = cache.get().await.unwrap();

        // Readers holding the old handle keep a consistent model.
        assert_eq!(before.predict(&[vec![0.0; 6]]).unwrap(), vec![1.0]);
        assert_eq!(after.predict(&[vec![0.0; 6]]).unwrap(), vec![5.0]);
        assert_eq!(
            cache.status().await,
            ModelStatus::Loaded {
                source: "second".to_string(),
                features: 6
            }
        );
    }

    #[tokio::test]
    async fn test_lazy_load_never_replaces_swapped_model() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        std::fs::write(&path, LINEAR_JSON).unwrap();
        let cache = ModelCache::new(Some(path), FeatureSchema::V1);

        cache.swap(constant_model(7.0), "swapped").await;
        // A load that finishes after the swap must be discarded.
        assert!(!cache.install_initial(constant_model(2.0), "file".to_string()).await);

        let model = cache.get().await.unwrap();
        assert_eq!(model.predict(&[vec![0.0; 6]]).unwrap(), vec![7.0]);
        assert!(matches!(cache.status().await, ModelStatus::Loaded { ref source, .. } if source == "swapped"));
    }

    #[tokio::test]
    async fn test_initial_install_fills_empty_slot() {
        let cache = ModelCache::new(None, FeatureSchema::V1);
        assert!(cache.install_initial(constant_model(3.0), "file".to_string()).await);
        assert!(!cache.install_initial(constant_model(4.0), "late".to_string()).await);
        let model = cache.slot.read().await.model.clone().unwrap();
        assert_eq!(model.predict(&[vec![0.0; 6]]).unwrap(), vec![3.0]);
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_current_model() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        std::fs::write(&path, LINEAR_JSON).unwrap();
        let cache = ModelCache::new(Some(path.clone()), FeatureSchema::V1);
        assert!(cache.get().await.is_some());

        std::fs::write(&path, "{ not json").unwrap();
        assert!(cache.reload().await.is_err());
        assert!(cache.get().await.is_some());
    }

    #[test]
    fn test_status_serializes_with_state_tag() {
        let cache = ModelCache::with_model(constant_model(1.0), "inline");
        let status = tokio_test::block_on(cache.status());
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "loaded");
        assert_eq!(json["source"], "inline");
        assert_eq!(json["features"], 6);
    }
}
