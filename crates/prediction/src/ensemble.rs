//! Statistical/mechanistic ensemble.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use dss_common::{DssError, DssResult};

use crate::cache::ModelCache;
use crate::config::{BlendWeights, EnsembleConfig};
use crate::mechanistic::{LimitingFactor, MechanisticModel, MechanisticOutcome};
use crate::schema::{FeatureMap, NDVI_MEAN};

/// Which sub-models contributed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendMode {
    Ensemble,
    StatisticalOnly,
    MechanisticOnly,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsemblePrediction {
    pub yield_value: f64,
    /// Absent when the statistical model was unavailable or failed
    pub statistical: Option<f64>,
    pub mechanistic: Option<MechanisticOutcome>,
    /// Weights actually applied
    pub weights: BlendWeights,
    pub mode: BlendMode,
    pub limiting_factor: LimitingFactor,
}

/// Blend two optional sub-predictions.
///
/// Pure: identical inputs always give the identical result.
pub fn blend(
    config: &EnsembleConfig,
    vegetation_index: f64,
    statistical: Option<f64>,
    mechanistic: Option<f64>,
) -> DssResult<(f64, BlendWeights, BlendMode)> {
    match (statistical, mechanistic) {
        (Some(s), Some(m)) => {
            let weights = config.weights_for(vegetation_index);
            let value = s * weights.statistical + m * weights.mechanistic;
            Ok((value, weights, BlendMode::Ensemble))
        }
        (Some(s), None) => Ok((s, BlendWeights::new(1.0, 0.0), BlendMode::StatisticalOnly)),
        (None, Some(m)) => Ok((m, BlendWeights::new(0.0, 1.0), BlendMode::MechanisticOnly)),
        (None, None) => Err(DssError::Ensemble(
            "Both statistical and mechanistic predictions are unavailable".to_string(),
        )),
    }
}

/// Blends a statistical regressor with the mechanistic stress model.
pub struct PredictionEnsemble {
    config: EnsembleConfig,
    models: Arc<ModelCache>,
    default_crop: String,
}

impl PredictionEnsemble {
    pub fn new(config: EnsembleConfig, models: Arc<ModelCache>, default_crop: impl Into<String>) -> Self {
        Self {
            config,
            models,
            default_crop: default_crop.into(),
        }
    }

    pub fn config(&self) -> &EnsembleConfig {
        &self.config
    }

    pub fn models(&self) -> &Arc<ModelCache> {
        &self.models
    }

    pub async fn predict(&self, features: &FeatureMap) -> DssResult<EnsemblePrediction> {
        self.predict_for_crop(features, &self.default_crop).await
    }

    pub async fn predict_for_crop(
        &self,
        features: &FeatureMap,
        crop: &str,
    ) -> DssResult<EnsemblePrediction> {
        let vegetation_index = validate_features(features)?;

        let statistical = self.statistical(features).await;
        let mechanistic = self.mechanistic(features, crop);

        let (yield_value, weights, mode) = blend(
            &self.config,
            vegetation_index,
            statistical,
            mechanistic.map(|m| m.yield_value),
        )?;

        debug!(
            statistical = ?statistical,
            mechanistic = ?mechanistic.map(|m| m.yield_value),
            weight_statistical = weights.statistical,
            weight_mechanistic = weights.mechanistic,
            yield_value,
            "Blended prediction"
        );

        Ok(EnsemblePrediction {
            yield_value,
            statistical,
            mechanistic,
            weights,
            mode,
            limiting_factor: mechanistic
                .map(|m| m.limiting_factor)
                .unwrap_or(LimitingFactor::None),
        })
    }

    async fn statistical(&self, features: &FeatureMap) -> Option<f64> {
        let model = self.models.get().await?;
        match model.predict(&[features.vector()]) {
            Ok(values) => match values.first() {
                Some(v) if v.is_finite() => Some(*v),
                other => {
                    warn!(output = ?other, "Statistical model returned no finite value, skipping it");
                    None
                }
            },
            Err(e) => {
                warn!(error = %e, "Statistical model failed, skipping it");
                None
            }
        }
    }

    fn mechanistic(&self, features: &FeatureMap, crop: &str) -> Option<MechanisticOutcome> {
        let model = MechanisticModel::new(
            *self.config.constants_for(crop),
            self.config.optimal_stress_threshold,
        );
        let outcome = model.simulate(features);
        if outcome.yield_value.is_finite() {
            Some(outcome)
        } else {
            warn!(crop = %crop, "Mechanistic model produced a non-finite yield, skipping it");
            None
        }
    }
}

/// All values finite and the vegetation index within [0, 1].
///
/// Returns the vegetation index.
fn validate_features(features: &FeatureMap) -> DssResult<f64> {
    if let Some(bad) = features.to_features().into_iter().find(|f| !f.value.is_finite()) {
        return Err(DssError::Validation(format!(
            "Feature {} is not finite",
            bad.name
        )));
    }
    let vegetation_index = features.get(NDVI_MEAN).ok_or_else(|| {
        DssError::Validation("Feature map has no vegetation index".to_string())
    })?;
    if !(0.0..=1.0).contains(&vegetation_index) {
        return Err(DssError::Validation(format!(
            "Vegetation index {} outside [0, 1]",
            vegetation_index
        )));
    }
    Ok(vegetation_index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TabularRegressor;
    use crate::schema::{FeatureSchema, PRECIP_MEAN};

    struct Constant(f64, Vec<String>);

    impl TabularRegressor for Constant {
        fn feature_names(&self) -> &[String] {
            &self.1
        }

        fn predict(&self, rows: &[Vec<f64>]) -> DssResult<Vec<f64>> {
            Ok(vec![self.0; rows.len()])
        }
    }

    struct Failing;

    impl TabularRegressor for Failing {
        fn feature_names(&self) -> &[String] {
            &[]
        }

        fn predict(&self, _rows: &[Vec<f64>]) -> DssResult<Vec<f64>> {
            Err(DssError::Ensemble("model exploded".to_string()))
        }
    }

    fn ensemble_with(model: Option<Arc<dyn TabularRegressor>>) -> PredictionEnsemble {
        let cache = match model {
            Some(m) => ModelCache::with_model(m, "test"),
            None => ModelCache::new(None, FeatureSchema::V1),
        };
        PredictionEnsemble::new(EnsembleConfig::default(), Arc::new(cache), "maize")
    }

    fn constant(value: f64) -> Option<Arc<dyn TabularRegressor>> {
        let names = FeatureSchema::V1.names().iter().map(|s| s.to_string()).collect();
        let model: Arc<dyn TabularRegressor> = Arc::new(Constant(value, names));
        Some(model)
    }

    fn features(ndvi: f64) -> FeatureMap {
        FeatureMap::defaults(FeatureSchema::V1)
            .with(NDVI_MEAN, ndvi)
            .unwrap()
            .with(PRECIP_MEAN, 2.25)
            .unwrap()
    }

    #[test]
    fn test_blend_weights_follow_vegetation_band() {
        let config = EnsembleConfig::default();

        let (value, weights, mode) = blend(&config, 0.55, Some(4.0), Some(2.0)).unwrap();
        assert_eq!(weights, BlendWeights::new(0.7, 0.3));
        assert_eq!(mode, BlendMode::Ensemble);
        assert!((value - 3.4).abs() < 1e-12);

        let (value, weights, _) = blend(&config, 0.10, Some(4.0), Some(2.0)).unwrap();
        assert_eq!(weights, BlendWeights::new(0.4, 0.6));
        assert!((value - 2.8).abs() < 1e-12);
    }

    #[test]
    fn test_blend_degrades_and_fails() {
        let config = EnsembleConfig::default();
        assert_eq!(
            blend(&config, 0.5, None, Some(2.0)).unwrap(),
            (2.0, BlendWeights::new(0.0, 1.0), BlendMode::MechanisticOnly)
        );
        assert_eq!(
            blend(&config, 0.5, Some(4.0), None).unwrap(),
            (4.0, BlendWeights::new(1.0, 0.0), BlendMode::StatisticalOnly)
        );
        let err = blend(&config, 0.5, None, None).unwrap_err();
        assert!(matches!(err, DssError::Ensemble(_)));
    }

    #[tokio::test]
    async fn test_full_ensemble() {
        let ensemble = ensemble_with(constant(4.0));
        let prediction = ensemble.predict(&features(0.55)).await.unwrap();

        // Mechanistic: 3.5 * 0.5 * 1.0
        assert_eq!(prediction.mechanistic.unwrap().yield_value, 1.75);
        assert_eq!(prediction.statistical, Some(4.0));
        assert_eq!(prediction.mode, BlendMode::Ensemble);
        assert!((prediction.yield_value - (4.0 * 0.7 + 1.75 * 0.3)).abs() < 1e-12);
        assert_eq!(prediction.limiting_factor, LimitingFactor::Water);
    }

    #[tokio::test]
    async fn test_failing_model_degrades_to_mechanistic() {
        let ensemble = ensemble_with(Some(Arc::new(Failing) as Arc<dyn TabularRegressor>));
        let prediction = ensemble.predict(&features(0.10)).await.unwrap();
        assert_eq!(prediction.mode, BlendMode::MechanisticOnly);
        assert_eq!(prediction.statistical, None);
        assert_eq!(prediction.yield_value, 1.75);

        let unconfigured = ensemble_with(None);
        let prediction = unconfigured.predict(&features(0.10)).await.unwrap();
        assert_eq!(prediction.mode, BlendMode::MechanisticOnly);
    }

    #[tokio::test]
    async fn test_prediction_is_deterministic() {
        let ensemble = ensemble_with(constant(3.3));
        let input = features(0.62);
        let first = ensemble.predict(&input).await.unwrap();
        for _ in 0..10 {
            let again = ensemble.predict(&input).await.unwrap();
            assert_eq!(again.yield_value.to_bits(), first.yield_value.to_bits());
            assert_eq!(again.limiting_factor, first.limiting_factor);
        }
    }

    #[tokio::test]
    async fn test_vegetation_index_out_of_range_rejected() {
        let ensemble = ensemble_with(constant(3.3));
        let err = ensemble.predict(&features(1.2)).await.unwrap_err();
        assert!(matches!(err, DssError::Validation(_)));
    }

    #[tokio::test]
    async fn test_crop_constants_apply() {
        let mut config = EnsembleConfig::default();
        config.crops.insert(
            "beans".to_string(),
            crate::config::CropConstants {
                base_potential: 1.8,
                ..Default::default()
            },
        );
        let ensemble = PredictionEnsemble::new(
            config,
            Arc::new(ModelCache::new(None, FeatureSchema::V1)),
            "maize",
        );
        let prediction = ensemble.predict_for_crop(&features(0.5), "beans").await.unwrap();
        assert_eq!(prediction.yield_value, 0.9);
    }
}
