//! Stress-factor crop growth model.

use serde::{Deserialize, Serialize};

use crate::config::CropConstants;
use crate::schema::{FeatureMap, PRECIP_MEAN, TEMP_MEAN};

/// The stress dimension most constraining a prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitingFactor {
    Water,
    Heat,
    None,
}

impl LimitingFactor {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitingFactor::Water => "water",
            LimitingFactor::Heat => "heat",
            LimitingFactor::None => "none",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MechanisticOutcome {
    pub yield_value: f64,
    pub water_stress: f64,
    pub heat_stress: f64,
    pub limiting_factor: LimitingFactor,
}

/// `yield = base_potential * water_stress * heat_stress`.
#[derive(Debug, Clone, Copy)]
pub struct MechanisticModel {
    constants: CropConstants,
    optimal_threshold: f64,
}

impl MechanisticModel {
    pub fn new(constants: CropConstants, optimal_threshold: f64) -> Self {
        Self {
            constants,
            optimal_threshold,
        }
    }

    pub fn simulate(&self, features: &FeatureMap) -> MechanisticOutcome {
        let precip = features.get(PRECIP_MEAN).unwrap_or(0.0);
        let temp = features.get(TEMP_MEAN).unwrap_or(0.0);
        self.simulate_values(precip, temp)
    }

    /// Both stresses are clamped to [0, 1].
    pub fn simulate_values(&self, precipitation_mean: f64, temperature_mean: f64) -> MechanisticOutcome {
        let c = &self.constants;
        let water_stress = (precipitation_mean / c.reference_precip).clamp(0.0, 1.0);
        let heat_stress = (1.0
            - ((temperature_mean - c.heat_threshold) * c.heat_sensitivity).max(0.0))
        .clamp(0.0, 1.0);

        MechanisticOutcome {
            yield_value: c.base_potential * water_stress * heat_stress,
            water_stress,
            heat_stress,
            limiting_factor: self.limiting_factor(water_stress, heat_stress),
        }
    }

    /// The lower stress, if below the optimal threshold. Ties go to water.
    fn limiting_factor(&self, water_stress: f64, heat_stress: f64) -> LimitingFactor {
        let lowest = water_stress.min(heat_stress);
        if lowest >= self.optimal_threshold {
            LimitingFactor::None
        } else if water_stress <= heat_stress {
            LimitingFactor::Water
        } else {
            LimitingFactor::Heat
        }
    }
}
