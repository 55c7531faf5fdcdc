//! WGS84 query points.

use serde::{Deserialize, Serialize};

use crate::error::{DssError, DssResult};

/// A longitude/latitude pair in WGS84 degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lon: f64,
    pub lat: f64,
}

impl GeoPoint {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }

    /// Reject non-finite or out-of-range coordinates.
    pub fn validate(&self) -> DssResult<()> {
        if !self.lon.is_finite() || !self.lat.is_finite() {
            return Err(DssError::Validation(format!(
                "Coordinates must be finite, got ({}, {})",
                self.lon, self.lat
            )));
        }
        if !(-180.0..=180.0).contains(&self.lon) {
            return Err(DssError::Validation(format!(
                "Longitude {} outside [-180, 180]",
                self.lon
            )));
        }
        if !(-90.0..=90.0).contains(&self.lat) {
            return Err(DssError::Validation(format!(
                "Latitude {} outside [-90, 90]",
                self.lat
            )));
        }
        Ok(())
    }
}

impl From<GeoPoint> for geo::Point<f64> {
    fn from(p: GeoPoint) -> Self {
        geo::Point::new(p.lon, p.lat)
    }
}

impl From<geo::Point<f64>> for GeoPoint {
    fn from(p: geo::Point<f64>) -> Self {
        GeoPoint::new(p.x(), p.y())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_point() {
        assert!(GeoPoint::new(36.82, -1.29).validate().is_ok());
        assert!(GeoPoint::new(181.0, 0.0).validate().is_err());
        assert!(GeoPoint::new(0.0, -90.5).validate().is_err());
        assert!(GeoPoint::new(f64::NAN, 0.0).validate().is_err());
    }
}
