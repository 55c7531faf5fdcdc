//! Versioned canonical feature schema.
//!
//! Every recognized feature has a fixed position and a documented default, so
//! a feature map is always complete and "used the default" is observable per
//! feature instead of being a silent zero.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use dss_common::{DssError, DssResult, ZoneAttributes};

pub const NDVI_MEAN: &str = "ndvi_mean";
pub const PRECIP_MEAN: &str = "precip_mean";
pub const ET_MEAN: &str = "et_mean";
pub const ELEVATION_MEAN: &str = "elevation_mean";
pub const SOIL_TEXTURE: &str = "soil_texture";
pub const TEMP_MEAN: &str = "temp_mean";

/// One canonical feature.
#[derive(Debug, Clone, Copy)]
pub struct FeatureSpec {
    pub name: &'static str,
    /// Value used when neither the raster nor the zone supplies one
    pub default: f64,
    /// Zone attribute that can supply this feature
    pub zone_attribute: fn(&ZoneAttributes) -> Option<f64>,
}

fn zone_ndvi(a: &ZoneAttributes) -> Option<f64> {
    a.vegetation_index_mean
}
fn zone_precip(a: &ZoneAttributes) -> Option<f64> {
    a.precipitation_mean
}
fn zone_et(a: &ZoneAttributes) -> Option<f64> {
    a.evapotranspiration_mean
}
fn zone_elevation(a: &ZoneAttributes) -> Option<f64> {
    a.elevation
}
fn zone_soil(a: &ZoneAttributes) -> Option<f64> {
    a.soil_texture_index
}
fn zone_temp(a: &ZoneAttributes) -> Option<f64> {
    a.temperature_mean
}

const V1_FEATURES: [FeatureSpec; 6] = [
    FeatureSpec {
        name: NDVI_MEAN,
        default: 0.52,
        zone_attribute: zone_ndvi,
    },
    FeatureSpec {
        name: PRECIP_MEAN,
        default: 5.1,
        zone_attribute: zone_precip,
    },
    FeatureSpec {
        name: ET_MEAN,
        default: 3.8,
        zone_attribute: zone_et,
    },
    FeatureSpec {
        name: ELEVATION_MEAN,
        default: 1850.0,
        zone_attribute: zone_elevation,
    },
    FeatureSpec {
        name: SOIL_TEXTURE,
        default: 2.0,
        zone_attribute: zone_soil,
    },
    FeatureSpec {
        name: TEMP_MEAN,
        default: 21.5,
        zone_attribute: zone_temp,
    },
];

/// Feature schema version. The order of features is the model column order
/// and the predictor-stack band order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FeatureSchema {
    #[default]
    #[serde(rename = "v1")]
    V1,
}

impl FeatureSchema {
    pub fn version(&self) -> &'static str {
        match self {
            FeatureSchema::V1 => "v1",
        }
    }

    pub fn features(&self) -> &'static [FeatureSpec] {
        match self {
            FeatureSchema::V1 => &V1_FEATURES,
        }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.features().iter().map(|f| f.name).collect()
    }

    pub fn len(&self) -> usize {
        self.features().len()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.features().iter().position(|f| f.name == name)
    }

    pub fn default_value(&self, name: &str) -> Option<f64> {
        self.features().iter().find(|f| f.name == name).map(|f| f.default)
    }
}

/// Where a feature value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureSource {
    Raster,
    Zone,
    Default,
}

/// A named feature value with its origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub name: String,
    pub value: f64,
    pub source: FeatureSource,
}

/// A complete feature map in canonical order.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMap {
    schema: FeatureSchema,
    entries: Vec<(f64, FeatureSource)>,
}

impl FeatureMap {
    /// Every feature at its documented default.
    pub fn defaults(schema: FeatureSchema) -> Self {
        Self {
            schema,
            entries: schema
                .features()
                .iter()
                .map(|f| (f.default, FeatureSource::Default))
                .collect(),
        }
    }

    pub fn builder(schema: FeatureSchema) -> FeatureMapBuilder {
        FeatureMapBuilder {
            schema,
            slots: vec![None; schema.len()],
        }
    }

    /// Override one feature, e.g. from a caller-supplied value.
    pub fn set(&mut self, name: &str, value: f64, source: FeatureSource) -> DssResult<()> {
        let index = self
            .schema
            .position(name)
            .ok_or_else(|| DssError::Validation(format!("Unknown feature '{}'", name)))?;
        if !value.is_finite() {
            return Err(DssError::Validation(format!(
                "Feature {} must be finite, got {}",
                name, value
            )));
        }
        self.entries[index] = (value, source);
        Ok(())
    }

    pub fn with(mut self, name: &str, value: f64) -> DssResult<Self> {
        self.set(name, value, FeatureSource::Raster)?;
        Ok(self)
    }

    pub fn schema(&self) -> FeatureSchema {
        self.schema
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.schema.position(name).map(|i| self.entries[i].0)
    }

    pub fn source(&self, name: &str) -> Option<FeatureSource> {
        self.schema.position(name).map(|i| self.entries[i].1)
    }

    /// Values in canonical column order.
    pub fn vector(&self) -> Vec<f64> {
        self.entries.iter().map(|(v, _)| *v).collect()
    }

    /// Names of the features that fell back to their default.
    pub fn defaults_used(&self) -> Vec<&'static str> {
        self.schema
            .features()
            .iter()
            .zip(&self.entries)
            .filter(|(_, (_, source))| *source == FeatureSource::Default)
            .map(|(spec, _)| spec.name)
            .collect()
    }

    pub fn to_features(&self) -> Vec<Feature> {
        self.schema
            .features()
            .iter()
            .zip(&self.entries)
            .map(|(spec, (value, source))| Feature {
                name: spec.name.to_string(),
                value: *value,
                source: *source,
            })
            .collect()
    }

    /// JSON snapshot stored with lineage observations.
    pub fn snapshot(&self) -> Value {
        let mut values = Map::new();
        let mut sources = Map::new();
        for feature in self.to_features() {
            values.insert(feature.name.clone(), json!(feature.value));
            sources.insert(feature.name, json!(feature.source));
        }
        json!({
            "schema": self.schema.version(),
            "values": values,
            "sources": sources,
        })
    }
}

/// Collects features from several sources; the first supplier of a key wins.
#[derive(Debug, Clone)]
pub struct FeatureMapBuilder {
    schema: FeatureSchema,
    slots: Vec<Option<(f64, FeatureSource)>>,
}

impl FeatureMapBuilder {
    /// Supply a feature by position. Returns false if the slot was already
    /// filled, the value is not finite, or the position is outside the schema.
    pub fn supply_at(&mut self, index: usize, value: f64, source: FeatureSource) -> bool {
        let Some(slot) = self.slots.get_mut(index) else {
            return false;
        };
        if slot.is_some() || !value.is_finite() {
            return false;
        }
        *slot = Some((value, source));
        true
    }

    pub fn supply(&mut self, name: &str, value: f64, source: FeatureSource) -> bool {
        match self.schema.position(name) {
            Some(index) => self.supply_at(index, value, source),
            None => false,
        }
    }

    /// Fill any keys not yet supplied from zone attributes.
    pub fn merge_zone(&mut self, attributes: &ZoneAttributes) -> usize {
        let mut merged = 0;
        for (index, spec) in self.schema.features().iter().enumerate() {
            if let Some(value) = (spec.zone_attribute)(attributes) {
                if self.supply_at(index, value, FeatureSource::Zone) {
                    merged += 1;
                }
            }
        }
        merged
    }

    pub fn is_supplied(&self, name: &str) -> bool {
        self.schema
            .position(name)
            .is_some_and(|i| self.slots[i].is_some())
    }

    pub fn build(self) -> FeatureMap {
        let entries = self
            .schema
            .features()
            .iter()
            .zip(self.slots)
            .map(|(spec, slot)| slot.unwrap_or((spec.default, FeatureSource::Default)))
            .collect();
        FeatureMap {
            schema: self.schema,
            entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_v1_order_and_defaults() {
        let schema = FeatureSchema::V1;
        assert_eq!(
            schema.names(),
            vec![NDVI_MEAN, PRECIP_MEAN, ET_MEAN, ELEVATION_MEAN, SOIL_TEXTURE, TEMP_MEAN]
        );
        let defaults = FeatureMap::defaults(schema);
        assert_eq!(defaults.vector(), vec![0.52, 5.1, 3.8, 1850.0, 2.0, 21.5]);
        assert_eq!(defaults.defaults_used().len(), 6);
        assert_eq!(schema.default_value(ELEVATION_MEAN), Some(1850.0));
        assert_eq!(schema.default_value("rainfall"), None);
    }

    #[test]
    fn test_raster_values_win_over_zone() {
        let mut builder = FeatureMap::builder(FeatureSchema::V1);
        assert!(builder.supply(NDVI_MEAN, 0.61, FeatureSource::Raster));
        assert!(!builder.supply_at(0, 0.9, FeatureSource::Raster));
        assert!(!builder.supply(PRECIP_MEAN, f64::NAN, FeatureSource::Raster));

        let merged = builder.merge_zone(&ZoneAttributes {
            vegetation_index_mean: Some(0.2),
            precipitation_mean: Some(3.3),
            elevation: Some(1720.0),
            ..Default::default()
        });
        assert_eq!(merged, 2);
        assert!(builder.is_supplied(ELEVATION_MEAN));
        assert!(!builder.is_supplied(TEMP_MEAN));

        let map = builder.build();
        assert_eq!(map.get(NDVI_MEAN), Some(0.61));
        assert_eq!(map.source(NDVI_MEAN), Some(FeatureSource::Raster));
        assert_eq!(map.get(PRECIP_MEAN), Some(3.3));
        assert_eq!(map.source(ELEVATION_MEAN), Some(FeatureSource::Zone));
        assert_eq!(map.defaults_used(), vec![ET_MEAN, SOIL_TEXTURE, TEMP_MEAN]);
    }

    #[test]
    fn test_set_rejects_unknown_and_non_finite() {
        let mut map = FeatureMap::defaults(FeatureSchema::V1);
        assert!(map.set("rainfall", 1.0, FeatureSource::Raster).is_err());
        assert!(map.set(TEMP_MEAN, f64::INFINITY, FeatureSource::Raster).is_err());
        map.set(TEMP_MEAN, 30.0, FeatureSource::Raster).unwrap();
        assert_eq!(map.get(TEMP_MEAN), Some(30.0));
    }

    #[test]
    fn test_snapshot_layout() {
        let snapshot = FeatureMap::defaults(FeatureSchema::V1).snapshot();
        assert_eq!(snapshot["schema"], "v1");
        assert_eq!(snapshot["values"]["elevation_mean"], 1850.0);
        assert_eq!(snapshot["sources"]["ndvi_mean"], "default");
    }
}
