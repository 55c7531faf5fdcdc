//! Self-describing metadata stored in the level-0 array attributes.

use std::sync::Arc;

use geo::{Coord, LineString, Polygon};
use serde::{Deserialize, Serialize};
use zarrs::array::Array;
use zarrs::storage::ReadableStorageTraits;

use dss_common::GeoPoint;
use projection::{CrsTransformer, WGS84_EPSG};

use crate::error::{RasterError, Result};
use crate::geotransform::GeoTransform;

/// Array path of the native-resolution level, relative to the artifact root.
pub const LEVEL0_PATH: &str = "0";

/// Attribute key holding [`ArtifactMetadata`].
pub const METADATA_ATTRIBUTE: &str = "raster";

pub const FORMAT_VERSION: u32 = 1;

/// Segments per extent edge when reprojecting the footprint.
const FOOTPRINT_SEGMENTS: usize = 16;

/// Pixel-space tolerance for points exactly on the right or bottom edge.
const EDGE_TOLERANCE: f64 = 1e-9;

/// One reduced-resolution level of the pyramid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverviewLevel {
    pub factor: u32,
    pub path: String,
    pub width: usize,
    pub height: usize,
}

/// Georeferencing and layout of a converted raster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub format_version: u32,
    pub width: usize,
    pub height: usize,
    /// Band names in storage order.
    pub bands: Vec<String>,
    pub epsg: u32,
    pub geotransform: GeoTransform,
    pub tile_size: usize,
    #[serde(default)]
    pub overviews: Vec<OverviewLevel>,
    pub compression: String,
    #[serde(default)]
    pub source_nodata: Option<f64>,
}

impl ArtifactMetadata {
    pub fn to_attributes(&self) -> Result<serde_json::Map<String, serde_json::Value>> {
        let value = serde_json::to_value(self)
            .map_err(|e| RasterError::invalid_metadata(e.to_string()))?;
        let mut attrs = serde_json::Map::new();
        attrs.insert(METADATA_ATTRIBUTE.to_string(), value);
        Ok(attrs)
    }

    pub fn from_attributes(attrs: &serde_json::Map<String, serde_json::Value>) -> Result<Self> {
        let value = attrs.get(METADATA_ATTRIBUTE).ok_or_else(|| {
            RasterError::invalid_metadata(format!("missing '{}' attribute", METADATA_ATTRIBUTE))
        })?;
        let metadata: Self = serde_json::from_value(value.clone())
            .map_err(|e| RasterError::invalid_metadata(e.to_string()))?;
        if metadata.format_version > FORMAT_VERSION {
            return Err(RasterError::invalid_metadata(format!(
                "unsupported artifact format version {}",
                metadata.format_version
            )));
        }
        Ok(metadata)
    }

    /// Read and cross-check metadata from an opened level-0 array.
    pub fn from_array<S: ?Sized>(array: &Array<S>) -> Result<Self> {
        let metadata = Self::from_attributes(array.attributes())?;
        let shape = array.shape();
        let expected = [
            metadata.bands.len() as u64,
            metadata.height as u64,
            metadata.width as u64,
        ];
        if shape != expected.as_slice() {
            return Err(RasterError::invalid_metadata(format!(
                "array shape {:?} does not match metadata {:?}",
                shape, expected
            )));
        }
        Ok(metadata)
    }

    /// Pixel-to-world transform of the overview stored at `path`.
    pub fn overview_transform(&self, path: &str) -> Option<GeoTransform> {
        self.overviews
            .iter()
            .find(|level| level.path == path)
            .map(|level| self.geotransform.scaled(level.factor))
    }

    /// Open the level-0 array under `root` and read its metadata.
    pub fn read<S: ReadableStorageTraits + ?Sized + 'static>(store: Arc<S>, root: &str) -> Result<Self> {
        let array = Array::open(store, &level0_path(root))
            .map_err(|e| RasterError::read(e.to_string()))?;
        Self::from_array(&array)
    }

    /// (min_x, min_y, max_x, max_y) in the raster CRS.
    pub fn extent(&self) -> (f64, f64, f64, f64) {
        let (w, h) = (self.width as f64, self.height as f64);
        let corners = [
            self.geotransform.apply(0.0, 0.0),
            self.geotransform.apply(w, 0.0),
            self.geotransform.apply(w, h),
            self.geotransform.apply(0.0, h),
        ];
        corners.iter().fold(
            (f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
            |(min_x, min_y, max_x, max_y), &(x, y)| {
                (min_x.min(x), min_y.min(y), max_x.max(x), max_y.max(y))
            },
        )
    }

    /// WGS84 polygon of the raster extent, edges densified before reprojection.
    pub fn footprint(&self) -> Result<Polygon<f64>> {
        let transformer = CrsTransformer::new(self.epsg, WGS84_EPSG)?;
        let (w, h) = (self.width as f64, self.height as f64);
        let corners = [(0.0, 0.0), (w, 0.0), (w, h), (0.0, h)];

        let mut coords = Vec::with_capacity(FOOTPRINT_SEGMENTS * 4 + 1);
        for i in 0..4 {
            let (c0, r0) = corners[i];
            let (c1, r1) = corners[(i + 1) % 4];
            for s in 0..FOOTPRINT_SEGMENTS {
                let t = s as f64 / FOOTPRINT_SEGMENTS as f64;
                let (x, y) = self.geotransform.apply(c0 + (c1 - c0) * t, r0 + (r1 - r0) * t);
                let (lon, lat) = transformer.transform(x, y)?;
                coords.push(Coord { x: lon, y: lat });
            }
        }
        coords.push(coords[0]);

        let polygon = Polygon::new(LineString::from(coords), vec![]);
        dss_common::validate_footprint(&polygon)
            .map_err(|e| RasterError::Georeference(format!("degenerate footprint: {}", e.detail())))?;
        Ok(polygon)
    }

    /// Integer (row, col) of the level-0 pixel holding a WGS84 point.
    pub fn locate(&self, point: GeoPoint) -> Result<(u64, u64)> {
        let (x, y) = if self.epsg == WGS84_EPSG {
            (point.lon, point.lat)
        } else {
            CrsTransformer::new(WGS84_EPSG, self.epsg)?.transform(point.lon, point.lat)?
        };
        let (col, row) = self.geotransform.invert(x, y)?;

        let outside = || RasterError::OutsideExtent {
            lon: point.lon,
            lat: point.lat,
        };
        let col = clamp_index(col, self.width).ok_or_else(outside)?;
        let row = clamp_index(row, self.height).ok_or_else(outside)?;
        Ok((row, col))
    }
}

fn clamp_index(position: f64, size: usize) -> Option<u64> {
    let size_f = size as f64;
    if !position.is_finite() || position < -EDGE_TOLERANCE || position > size_f + EDGE_TOLERANCE {
        return None;
    }
    if position >= size_f {
        return Some(size as u64 - 1);
    }
    Some(position.max(0.0).floor() as u64)
}

pub(crate) fn level0_path(root: &str) -> String {
    array_path(root, LEVEL0_PATH)
}

pub(crate) fn array_path(root: &str, name: &str) -> String {
    let root = root.trim_matches('/');
    if root.is_empty() {
        format!("/{}", name)
    } else {
        format!("/{}/{}", root, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(epsg: u32, geotransform: GeoTransform, width: usize, height: usize) -> ArtifactMetadata {
        ArtifactMetadata {
            format_version: FORMAT_VERSION,
            width,
            height,
            bands: vec!["ndvi".to_string()],
            epsg,
            geotransform,
            tile_size: 256,
            overviews: vec![],
            compression: "none".to_string(),
            source_nodata: None,
        }
    }

    #[test]
    fn test_attributes_round_trip() {
        let meta = metadata(4326, GeoTransform::north_up(36.0, 0.0, 0.01, 0.01), 100, 50);
        let attrs = meta.to_attributes().unwrap();
        assert!(attrs.contains_key(METADATA_ATTRIBUTE));
        assert_eq!(ArtifactMetadata::from_attributes(&attrs).unwrap(), meta);
    }

    #[test]
    fn test_overview_transform_scales_pixels() {
        let mut meta = metadata(4326, GeoTransform::north_up(36.0, 0.0, 0.01, 0.01), 100, 50);
        meta.overviews.push(OverviewLevel {
            factor: 2,
            path: "ov2".to_string(),
            width: 50,
            height: 25,
        });

        let ov = meta.overview_transform("ov2").unwrap();
        let (x, y) = ov.apply(1.0, 1.0);
        assert!((x - 36.02).abs() < 1e-12);
        assert!((y + 0.02).abs() < 1e-12);
        assert!(meta.overview_transform("ov4").is_none());
    }

    #[test]
    fn test_missing_attribute_is_invalid_metadata() {
        let err = ArtifactMetadata::from_attributes(&serde_json::Map::new()).unwrap_err();
        assert!(matches!(err, RasterError::InvalidMetadata(_)));
    }

    #[test]
    fn test_locate_clamps_far_edges() {
        let meta = metadata(4326, GeoTransform::north_up(36.0, 0.0, 0.01, 0.01), 100, 50);
        assert_eq!(meta.locate(GeoPoint::new(36.005, -0.005)).unwrap(), (0, 0));
        // Exactly on the right and bottom edges.
        assert_eq!(meta.locate(GeoPoint::new(37.0, -0.5)).unwrap(), (49, 99));
        assert!(matches!(
            meta.locate(GeoPoint::new(37.02, -0.1)),
            Err(RasterError::OutsideExtent { .. })
        ));
    }

    #[test]
    fn test_geographic_footprint_matches_extent() {
        let meta = metadata(4326, GeoTransform::north_up(36.0, 0.0, 0.01, 0.01), 100, 50);
        let footprint = meta.footprint().unwrap();
        let bbox = dss_common::BoundingBox::of_polygon(&footprint).unwrap();
        assert!((bbox.min_x - 36.0).abs() < 1e-9);
        assert!((bbox.max_x - 37.0).abs() < 1e-9);
        assert!((bbox.min_y + 0.5).abs() < 1e-9);
        assert!(bbox.max_y.abs() < 1e-9);
        assert_eq!(footprint.exterior().0.len(), FOOTPRINT_SEGMENTS * 4 + 1);
    }

    #[test]
    fn test_array_paths() {
        assert_eq!(level0_path(""), "/0");
        assert_eq!(level0_path("NDVI/20240101T000000Z/a.zarr"), "/NDVI/20240101T000000Z/a.zarr/0");
        assert_eq!(array_path("/x/", "ov2"), "/x/ov2");
    }
}
