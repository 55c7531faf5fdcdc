//! Catalog entities: raster assets, zones and yield observations.

use chrono::{DateTime, Utc};
use geo::{Area, MultiPolygon, Polygon};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DssError, DssResult};
use crate::point::GeoPoint;

/// A converted raster artifact registered in the catalog.
///
/// Assets are immutable; reprocessing a raster registers a new asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterAsset {
    pub id: Uuid,
    /// Storage URL of the tiled artifact
    pub url: String,
    pub captured_at: DateTime<Utc>,
    /// Asset type tag, e.g. "PredictorStack"
    pub asset_type: String,
    pub crop_id: Option<String>,
    /// WGS84 footprint of the converted artifact
    pub footprint: Polygon<f64>,
    /// Band names in artifact order
    pub bands: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Fields supplied when registering a new asset.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRasterAsset {
    pub url: String,
    pub captured_at: DateTime<Utc>,
    pub asset_type: String,
    pub crop_id: Option<String>,
    pub footprint: Polygon<f64>,
    pub bands: Vec<String>,
}

impl NewRasterAsset {
    pub fn validate(&self) -> DssResult<()> {
        if self.url.is_empty() {
            return Err(DssError::Validation("Asset URL is empty".to_string()));
        }
        if self.asset_type.trim().is_empty() {
            return Err(DssError::Validation("Asset type is empty".to_string()));
        }
        if self.bands.is_empty() {
            return Err(DssError::Validation(
                "Asset must declare at least one band".to_string(),
            ));
        }
        validate_footprint(&self.footprint)
    }

    pub fn into_asset(self, id: Uuid, created_at: DateTime<Utc>) -> RasterAsset {
        RasterAsset {
            id,
            url: self.url,
            captured_at: self.captured_at,
            asset_type: self.asset_type,
            crop_id: self.crop_id,
            footprint: self.footprint,
            bands: self.bands,
            created_at,
        }
    }
}

/// A footprint must be a closed, finite ring enclosing a positive area.
pub fn validate_footprint(footprint: &Polygon<f64>) -> DssResult<()> {
    let ring = footprint.exterior();
    if ring.0.len() < 4 || !ring.is_closed() {
        return Err(DssError::Validation(
            "Footprint ring must be closed with at least 3 distinct vertices".to_string(),
        ));
    }
    if ring.0.iter().any(|c| !c.x.is_finite() || !c.y.is_finite()) {
        return Err(DssError::Validation(
            "Footprint contains non-finite coordinates".to_string(),
        ));
    }
    if footprint.unsigned_area() <= 0.0 {
        return Err(DssError::Validation("Footprint has zero area".to_string()));
    }
    Ok(())
}

/// Yearly auxiliary statistics carried by a zone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ZoneAttributes {
    pub vegetation_index_mean: Option<f64>,
    pub precipitation_mean: Option<f64>,
    pub evapotranspiration_mean: Option<f64>,
    pub temperature_mean: Option<f64>,
    pub elevation: Option<f64>,
    pub soil_texture_index: Option<f64>,
}

impl ZoneAttributes {
    /// Overlay `other` onto `self`; values present in `other` win.
    pub fn merge_from(&mut self, other: &ZoneAttributes) {
        fn take(dst: &mut Option<f64>, src: Option<f64>) {
            if src.is_some() {
                *dst = src;
            }
        }
        take(&mut self.vegetation_index_mean, other.vegetation_index_mean);
        take(&mut self.precipitation_mean, other.precipitation_mean);
        take(&mut self.evapotranspiration_mean, other.evapotranspiration_mean);
        take(&mut self.temperature_mean, other.temperature_mean);
        take(&mut self.elevation, other.elevation);
        take(&mut self.soil_texture_index, other.soil_texture_index);
    }

    pub fn is_empty(&self) -> bool {
        *self == ZoneAttributes::default()
    }
}

/// An administrative unit with a polygon and yearly statistics.
///
/// Unique per (zone_code, year).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub id: Uuid,
    pub zone_code: String,
    pub name: Option<String>,
    pub parent_region: Option<String>,
    pub year: i32,
    /// Absent until a boundary import supplies it
    pub geometry: Option<MultiPolygon<f64>>,
    pub attributes: ZoneAttributes,
    pub updated_at: DateTime<Utc>,
}

/// Insert-or-update payload keyed by (zone_code, year).
///
/// Absent fields leave the stored value untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneUpsert {
    pub zone_code: String,
    pub year: i32,
    pub name: Option<String>,
    pub parent_region: Option<String>,
    pub geometry: Option<MultiPolygon<f64>>,
    pub attributes: ZoneAttributes,
}

impl ZoneUpsert {
    pub fn new(zone_code: impl Into<String>, year: i32) -> Self {
        Self {
            zone_code: zone_code.into(),
            year,
            name: None,
            parent_region: None,
            geometry: None,
            attributes: ZoneAttributes::default(),
        }
    }

    pub fn validate(&self) -> DssResult<()> {
        if self.zone_code.trim().is_empty() {
            return Err(DssError::Validation("Zone code is empty".to_string()));
        }
        if !(1900..=2200).contains(&self.year) {
            return Err(DssError::Validation(format!(
                "Zone year {} out of range",
                self.year
            )));
        }
        if let Some(geometry) = &self.geometry {
            if geometry.0.is_empty() {
                return Err(DssError::Validation(format!(
                    "Zone {} has an empty geometry",
                    self.zone_code
                )));
            }
        }
        Ok(())
    }
}

/// Where an observation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationSource {
    /// Field sample loaded by bulk import
    Import,
    /// Lineage record written after a prediction
    Prediction,
}

impl ObservationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObservationSource::Import => "import",
            ObservationSource::Prediction => "prediction",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "import" => Some(ObservationSource::Import),
            "prediction" => Some(ObservationSource::Prediction),
            _ => None,
        }
    }
}

/// A point yield record. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub id: Uuid,
    pub crop_id: String,
    pub year: i32,
    pub yield_value: f64,
    pub location: GeoPoint,
    /// Feature map snapshot used to produce or explain the value
    pub features: Option<serde_json::Value>,
    pub source: ObservationSource,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewObservation {
    pub crop_id: String,
    pub year: i32,
    pub yield_value: f64,
    pub location: GeoPoint,
    pub features: Option<serde_json::Value>,
    pub source: ObservationSource,
}

impl NewObservation {
    pub fn validate(&self) -> DssResult<()> {
        if self.crop_id.trim().is_empty() {
            return Err(DssError::Validation("Crop id is empty".to_string()));
        }
        if !self.yield_value.is_finite() {
            return Err(DssError::Validation(format!(
                "Yield value {} is not finite",
                self.yield_value
            )));
        }
        self.location.validate()
    }

    pub fn into_observation(self, id: Uuid, recorded_at: DateTime<Utc>) -> Observation {
        Observation {
            id,
            crop_id: self.crop_id,
            year: self.year,
            yield_value: self.yield_value,
            location: self.location,
            features: self.features,
            source: self.source,
            recorded_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bbox::BoundingBox;
    use geo::{Coord, LineString};

    #[test]
    fn test_footprint_validation() {
        let good = BoundingBox::new(36.0, -1.5, 37.0, -0.5).to_polygon();
        assert!(validate_footprint(&good).is_ok());

        let flat = Polygon::new(
            LineString::from(vec![
                Coord { x: 0.0, y: 0.0 },
                Coord { x: 1.0, y: 0.0 },
                Coord { x: 2.0, y: 0.0 },
                Coord { x: 0.0, y: 0.0 },
            ]),
            vec![],
        );
        assert!(validate_footprint(&flat).is_err());
    }

    #[test]
    fn test_attribute_merge_keeps_existing_values() {
        let mut stored = ZoneAttributes {
            vegetation_index_mean: Some(0.5),
            precipitation_mean: Some(4.0),
            ..Default::default()
        };
        let incoming = ZoneAttributes {
            precipitation_mean: Some(6.0),
            temperature_mean: Some(22.0),
            ..Default::default()
        };
        stored.merge_from(&incoming);

        assert_eq!(stored.vegetation_index_mean, Some(0.5));
        assert_eq!(stored.precipitation_mean, Some(6.0));
        assert_eq!(stored.temperature_mean, Some(22.0));
        assert_eq!(stored.elevation, None);
    }

    #[test]
    fn test_zone_upsert_validation() {
        assert!(ZoneUpsert::new("W1", 2024).validate().is_ok());
        assert!(ZoneUpsert::new("  ", 2024).validate().is_err());
        assert!(ZoneUpsert::new("W1", 1024).validate().is_err());
    }
}
