//! Prediction and ensemble configuration.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use dss_common::{DssError, DssResult};

/// Mechanistic model constants for one crop/region.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CropConstants {
    /// Attainable yield without stress (t/ha)
    pub base_potential: f64,
    /// Mean precipitation at which water stress vanishes
    pub reference_precip: f64,
    /// Mean temperature above which heat stress starts (°C)
    pub heat_threshold: f64,
    /// Fractional yield loss per degree above the threshold
    pub heat_sensitivity: f64,
}

impl Default for CropConstants {
    /// Maize in the Kenyan highlands.
    fn default() -> Self {
        Self {
            base_potential: 3.5,
            reference_precip: 4.5,
            heat_threshold: 28.0,
            heat_sensitivity: 0.1,
        }
    }
}

impl CropConstants {
    fn validate(&self, crop: &str) -> DssResult<()> {
        let positive = [
            ("base_potential", self.base_potential),
            ("reference_precip", self.reference_precip),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(DssError::Validation(format!(
                    "{} for crop '{}' must be positive, got {}",
                    name, crop, value
                )));
            }
        }
        if !self.heat_threshold.is_finite()
            || !self.heat_sensitivity.is_finite()
            || self.heat_sensitivity < 0.0
        {
            return Err(DssError::Validation(format!(
                "Heat constants for crop '{}' are invalid",
                crop
            )));
        }
        Ok(())
    }
}

/// Statistical/mechanistic weight pair. Must sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlendWeights {
    pub statistical: f64,
    pub mechanistic: f64,
}

impl BlendWeights {
    pub const fn new(statistical: f64, mechanistic: f64) -> Self {
        Self {
            statistical,
            mechanistic,
        }
    }

    fn validate(&self, label: &str) -> DssResult<()> {
        let in_range = |w: f64| w.is_finite() && (0.0..=1.0).contains(&w);
        if !in_range(self.statistical)
            || !in_range(self.mechanistic)
            || (self.statistical + self.mechanistic - 1.0).abs() > 1e-9
        {
            return Err(DssError::Validation(format!(
                "{} weights ({}, {}) must be in [0, 1] and sum to 1",
                label, self.statistical, self.mechanistic
            )));
        }
        Ok(())
    }
}

/// Named, overridable ensemble constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleConfig {
    /// Constants for crops without an entry in `crops`
    pub default_constants: CropConstants,
    /// Per-crop overrides keyed by crop id
    pub crops: HashMap<String, CropConstants>,
    /// A stress factor below this is reported as limiting
    pub optimal_stress_threshold: f64,
    /// Inclusive vegetation-index band considered normal
    pub normal_vegetation_band: (f64, f64),
    /// Weights inside the normal band
    pub normal_weights: BlendWeights,
    /// Weights outside the normal band
    pub abnormal_weights: BlendWeights,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            default_constants: CropConstants::default(),
            crops: HashMap::new(),
            optimal_stress_threshold: 0.85,
            normal_vegetation_band: (0.4, 0.7),
            normal_weights: BlendWeights::new(0.7, 0.3),
            abnormal_weights: BlendWeights::new(0.4, 0.6),
        }
    }
}

impl EnsembleConfig {
    /// Parse from YAML; absent keys keep their defaults.
    pub fn from_yaml(contents: &str) -> DssResult<Self> {
        let config: Self = serde_yaml::from_str(contents)
            .map_err(|e| DssError::Validation(format!("Invalid ensemble config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> DssResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            DssError::Validation(format!(
                "Failed to read ensemble config {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_yaml(&contents)
    }

    /// Load from `DSS_ENSEMBLE_CONFIG` if set, then apply env overrides.
    ///
    /// An unreadable or invalid file is logged and the defaults are used.
    pub fn from_env() -> Self {
        let mut config = match std::env::var("DSS_ENSEMBLE_CONFIG") {
            Ok(path) => Self::load(Path::new(&path)).unwrap_or_else(|e| {
                warn!(path = %path, error = %e, "Using default ensemble config");
                Self::default()
            }),
            Err(_) => Self::default(),
        };

        if let Ok(val) = std::env::var("DSS_OPTIMAL_STRESS_THRESHOLD") {
            if let Ok(threshold) = val.parse() {
                config.optimal_stress_threshold = threshold;
            }
        }

        if let Ok(val) = std::env::var("DSS_NORMAL_VEGETATION_BAND") {
            let bounds: Vec<f64> = val.split(',').filter_map(|s| s.trim().parse().ok()).collect();
            if let &[lo, hi] = bounds.as_slice() {
                config.normal_vegetation_band = (lo, hi);
            }
        }

        if let Err(e) = config.validate() {
            warn!(error = %e, "Ensemble env overrides rejected, using defaults");
            return Self::default();
        }
        config
    }

    pub fn validate(&self) -> DssResult<()> {
        self.default_constants.validate("default")?;
        for (crop, constants) in &self.crops {
            constants.validate(crop)?;
        }
        let (lo, hi) = self.normal_vegetation_band;
        if !lo.is_finite() || !hi.is_finite() || lo > hi {
            return Err(DssError::Validation(format!(
                "Normal vegetation band [{}, {}] is invalid",
                lo, hi
            )));
        }
        if !self.optimal_stress_threshold.is_finite() {
            return Err(DssError::Validation(
                "Optimal stress threshold must be finite".to_string(),
            ));
        }
        self.normal_weights.validate("Normal")?;
        self.abnormal_weights.validate("Abnormal")?;
        Ok(())
    }

    pub fn constants_for(&self, crop: &str) -> &CropConstants {
        self.crops.get(crop).unwrap_or(&self.default_constants)
    }

    /// Weights for a vegetation index value; the band is inclusive.
    pub fn weights_for(&self, vegetation_index: f64) -> BlendWeights {
        let (lo, hi) = self.normal_vegetation_band;
        if (lo..=hi).contains(&vegetation_index) {
            self.normal_weights
        } else {
            self.abnormal_weights
        }
    }
}

/// Settings for point queries.
#[derive(Debug, Clone)]
pub struct PredictionConfig {
    /// Statistical model artifact (JSON); the statistical sub-model is skipped if unset
    pub model_path: Option<PathBuf>,
    /// Asset type tag of the multi-band predictor stack
    pub predictor_asset_type: String,
    /// Crop used for mechanistic constants and lineage records
    pub default_crop: String,
    /// Append an observation for every prediction
    pub lineage_enabled: bool,
    /// Maximum number of time-series samples per query
    pub time_series_limit: usize,
    pub ensemble: EnsembleConfig,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            predictor_asset_type: "PredictorStack".to_string(),
            default_crop: "maize".to_string(),
            lineage_enabled: true,
            time_series_limit: 24,
            ensemble: EnsembleConfig::default(),
        }
    }
}

impl PredictionConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self {
            ensemble: EnsembleConfig::from_env(),
            ..Self::default()
        };

        if let Ok(path) = std::env::var("DSS_MODEL_PATH") {
            if !path.trim().is_empty() {
                config.model_path = Some(PathBuf::from(path));
            }
        }

        if let Ok(val) = std::env::var("DSS_PREDICTOR_ASSET_TYPE") {
            config.predictor_asset_type = val;
        }

        if let Ok(val) = std::env::var("DSS_DEFAULT_CROP") {
            config.default_crop = val;
        }

        if let Ok(val) = std::env::var("DSS_LINEAGE_ENABLED") {
            config.lineage_enabled = val.to_lowercase() == "true" || val == "1";
        }

        if let Ok(val) = std::env::var("DSS_TIME_SERIES_LIMIT") {
            if let Ok(limit) = val.parse() {
                config.time_series_limit = limit;
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EnsembleConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.weights_for(0.55), BlendWeights::new(0.7, 0.3));
        assert_eq!(config.weights_for(0.10), BlendWeights::new(0.4, 0.6));
    }

    #[test]
    fn test_band_edges_are_normal() {
        let config = EnsembleConfig::default();
        assert_eq!(config.weights_for(0.4), config.normal_weights);
        assert_eq!(config.weights_for(0.7), config.normal_weights);
        assert_eq!(config.weights_for(0.7000001), config.abnormal_weights);
    }

    #[test]
    fn test_yaml_overrides() {
        let yaml = r#"
optimal_stress_threshold: 0.9
crops:
  beans:
    base_potential: 1.8
    reference_precip: 3.0
    heat_threshold: 30.0
    heat_sensitivity: 0.08
normal_weights:
  statistical: 0.6
  mechanistic: 0.4
"#;
        let config = EnsembleConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.optimal_stress_threshold, 0.9);
        assert_eq!(config.constants_for("beans").base_potential, 1.8);
        assert_eq!(config.constants_for("maize"), &CropConstants::default());
        assert_eq!(config.normal_weights, BlendWeights::new(0.6, 0.4));
        assert_eq!(config.abnormal_weights, BlendWeights::new(0.4, 0.6));
    }

    #[test]
    fn test_invalid_weights_rejected() {
        let yaml = "abnormal_weights:\n  statistical: 0.5\n  mechanistic: 0.6\n";
        assert!(matches!(
            EnsembleConfig::from_yaml(yaml),
            Err(DssError::Validation(_))
        ));
    }
}
