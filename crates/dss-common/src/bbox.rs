//! Bounding box types and operations.

use geo::{BoundingRect, Coord, LineString, Polygon};
use serde::{Deserialize, Serialize};

/// An axis-aligned bounding box.
///
/// For geographic CRS (EPSG:4326), coordinates are in degrees.
/// For projected CRS, coordinates are in the CRS units (usually meters).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    /// Create a new bounding box from corner coordinates.
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Bounding box of a polygon, or None for an empty ring.
    pub fn of_polygon(polygon: &Polygon<f64>) -> Option<Self> {
        polygon
            .bounding_rect()
            .map(|r| Self::new(r.min().x, r.min().y, r.max().x, r.max().y))
    }

    /// Width of the bounding box in coordinate units.
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    /// Height of the bounding box in coordinate units.
    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// True when the box has zero or negative area, or non-finite corners.
    pub fn is_degenerate(&self) -> bool {
        ![self.min_x, self.min_y, self.max_x, self.max_y]
            .iter()
            .all(|v| v.is_finite())
            || self.width() <= 0.0
            || self.height() <= 0.0
    }

    /// Check if this bbox intersects another. Touching edges count.
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_x <= other.max_x
            && self.max_x >= other.min_x
            && self.min_y <= other.max_y
            && self.max_y >= other.min_y
    }

    /// Check if a point is contained within this bbox (edges inclusive).
    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }

    /// Closed counter-clockwise polygon ring for this box.
    pub fn to_polygon(&self) -> Polygon<f64> {
        Polygon::new(
            LineString::from(vec![
                Coord { x: self.min_x, y: self.min_y },
                Coord { x: self.max_x, y: self.min_y },
                Coord { x: self.max_x, y: self.max_y },
                Coord { x: self.min_x, y: self.max_y },
                Coord { x: self.min_x, y: self.min_y },
            ]),
            vec![],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bbox_intersects() {
        let a = BoundingBox::new(36.0, -2.0, 38.0, 0.0);
        let b = BoundingBox::new(37.5, -0.5, 40.0, 1.0);
        let c = BoundingBox::new(38.5, 0.5, 40.0, 1.0);
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
    }

    #[test]
    fn test_bbox_polygon_round_trip() {
        let bbox = BoundingBox::new(36.0, -2.0, 38.0, 0.0);
        let poly = bbox.to_polygon();
        assert_eq!(poly.exterior().0.len(), 5);
        assert_eq!(BoundingBox::of_polygon(&poly), Some(bbox));
    }

    #[test]
    fn test_degenerate() {
        assert!(BoundingBox::new(1.0, 1.0, 1.0, 2.0).is_degenerate());
        assert!(BoundingBox::new(0.0, f64::NAN, 1.0, 2.0).is_degenerate());
        assert!(!BoundingBox::new(0.0, 0.0, 1.0, 2.0).is_degenerate());
    }
}
