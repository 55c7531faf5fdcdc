//! Point query orchestration: extraction, ensemble, time series, lineage.

use std::sync::Arc;

use chrono::Datelike;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use dss_common::{DateRange, DssResult, GeoPoint, NewObservation, ObservationSource};
use storage::{ObjectStorage, SpatialCatalog};

use crate::cache::{ModelCache, ModelStatus};
use crate::config::{BlendWeights, PredictionConfig};
use crate::ensemble::{BlendMode, EnsemblePrediction, PredictionEnsemble};
use crate::extractor::{Extraction, FeatureExtractor, SeriesPoint, ZoneRef};
use crate::mechanistic::LimitingFactor;
use crate::schema::{Feature, FeatureSchema, NDVI_MEAN};

/// Everything needed to audit a prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub schema_version: String,
    pub asset_id: Option<Uuid>,
    pub asset_url: Option<String>,
    pub zone: Option<ZoneRef>,
    pub crop_id: String,
    pub statistical: Option<f64>,
    pub mechanistic: Option<f64>,
    pub water_stress: Option<f64>,
    pub heat_stress: Option<f64>,
    pub weights: BlendWeights,
    pub mode: BlendMode,
    pub limiting_factor: LimitingFactor,
    pub defaults_used: Vec<String>,
    pub warnings: Vec<String>,
    /// Observation written for this prediction, if lineage succeeded
    pub lineage_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointPrediction {
    pub predicted_yield: f64,
    pub features: Vec<Feature>,
    /// Vegetation index over the query window
    pub time_series: Vec<SeriesPoint>,
    pub provenance: Provenance,
}

/// Serves `query_point` over a catalog and object storage.
pub struct PointQueryService {
    catalog: Arc<dyn SpatialCatalog>,
    extractor: FeatureExtractor,
    ensemble: PredictionEnsemble,
    config: PredictionConfig,
}

impl PointQueryService {
    /// Build with a model cache that loads `config.model_path` on first use.
    pub fn new(
        catalog: Arc<dyn SpatialCatalog>,
        storage: Arc<ObjectStorage>,
        config: PredictionConfig,
    ) -> Self {
        let models = Arc::new(ModelCache::new(config.model_path.clone(), FeatureSchema::V1));
        Self::with_models(catalog, storage, config, models)
    }

    /// Build around an existing, possibly shared, model cache.
    pub fn with_models(
        catalog: Arc<dyn SpatialCatalog>,
        storage: Arc<ObjectStorage>,
        config: PredictionConfig,
        models: Arc<ModelCache>,
    ) -> Self {
        let extractor = FeatureExtractor::new(
            catalog.clone(),
            storage,
            FeatureSchema::V1,
            config.predictor_asset_type.clone(),
        );
        let ensemble =
            PredictionEnsemble::new(config.ensemble.clone(), models, config.default_crop.clone());
        Self {
            catalog,
            extractor,
            ensemble,
            config,
        }
    }

    pub fn extractor(&self) -> &FeatureExtractor {
        &self.extractor
    }

    pub fn ensemble(&self) -> &PredictionEnsemble {
        &self.ensemble
    }

    pub async fn model_status(&self) -> ModelStatus {
        self.ensemble.models().status().await
    }

    /// Predict yield at `point` from data captured within `window`.
    ///
    /// Missing rasters or zones degrade to default features. Fails only on
    /// invalid input, catalog read failures, or when no sub-model can
    /// produce a value.
    pub async fn query_point(&self, point: GeoPoint, window: &DateRange) -> DssResult<PointPrediction> {
        let crop_id = self.config.default_crop.clone();
        let extraction = self.extractor.extract(point, window).await?;
        let prediction = self.ensemble.predict_for_crop(&extraction.features, &crop_id).await?;

        let time_series = self
            .extractor
            .feature_series(
                point,
                &extraction.predictor_assets,
                NDVI_MEAN,
                self.config.time_series_limit,
            )
            .await;

        let lineage_id = if self.config.lineage_enabled {
            self.record_lineage(point, window, &crop_id, &extraction, &prediction).await
        } else {
            None
        };

        info!(
            lon = point.lon,
            lat = point.lat,
            yield_value = prediction.yield_value,
            mode = ?prediction.mode,
            weight_statistical = prediction.weights.statistical,
            weight_mechanistic = prediction.weights.mechanistic,
            limiting_factor = prediction.limiting_factor.as_str(),
            "Point prediction complete"
        );

        let provenance = Provenance {
            schema_version: extraction.features.schema().version().to_string(),
            asset_id: extraction.asset.as_ref().map(|a| a.id),
            asset_url: extraction.asset.as_ref().map(|a| a.url.clone()),
            zone: extraction.zone.clone(),
            crop_id,
            statistical: prediction.statistical,
            mechanistic: prediction.mechanistic.map(|m| m.yield_value),
            water_stress: prediction.mechanistic.map(|m| m.water_stress),
            heat_stress: prediction.mechanistic.map(|m| m.heat_stress),
            weights: prediction.weights,
            mode: prediction.mode,
            limiting_factor: prediction.limiting_factor,
            defaults_used: extraction
                .features
                .defaults_used()
                .into_iter()
                .map(String::from)
                .collect(),
            warnings: extraction.warnings.clone(),
            lineage_id,
        };

        Ok(PointPrediction {
            predicted_yield: prediction.yield_value,
            features: extraction.features.to_features(),
            time_series,
            provenance,
        })
    }

    /// Append the prediction as an observation. Failures are logged only.
    async fn record_lineage(
        &self,
        point: GeoPoint,
        window: &DateRange,
        crop_id: &str,
        extraction: &Extraction,
        prediction: &EnsemblePrediction,
    ) -> Option<Uuid> {
        let mut snapshot = extraction.features.snapshot();
        let summary = json!({
            "statistical": prediction.statistical,
            "mechanistic": prediction.mechanistic.map(|m| m.yield_value),
            "weights": prediction.weights,
            "limiting_factor": prediction.limiting_factor,
            "asset_id": extraction.asset.as_ref().map(|a| a.id),
            "zone_code": extraction.zone.as_ref().map(|z| z.zone_code.clone()),
        });
        if let Some(fields) = snapshot.as_object_mut() {
            fields.insert("prediction".to_string(), summary);
        }

        let observation = NewObservation {
            crop_id: crop_id.to_string(),
            year: window.end.year(),
            yield_value: prediction.yield_value,
            location: point,
            features: Some(snapshot),
            source: ObservationSource::Prediction,
        };

        match self.catalog.record_observation(observation).await {
            Ok(recorded) => Some(recorded.id),
            Err(e) => {
                warn!(error = %e, "Lineage write failed, returning prediction anyway");
                None
            }
        }
    }
}
