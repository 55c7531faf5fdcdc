//! GeoJSON exchange for catalog geometries.

use geo::{Geometry, MultiPolygon, Polygon};

use dss_common::{DssError, DssResult};

fn parse(json: &str) -> DssResult<Geometry<f64>> {
    let geometry: geojson::Geometry = serde_json::from_str(json)
        .map_err(|e| DssError::Validation(format!("Invalid GeoJSON geometry: {}", e)))?;
    Geometry::<f64>::try_from(geometry)
        .map_err(|e| DssError::Validation(format!("Unsupported GeoJSON geometry: {}", e)))
}

fn render(value: geojson::Value) -> DssResult<String> {
    serde_json::to_string(&geojson::Geometry::new(value))
        .map_err(|e| DssError::Catalog(format!("Failed to encode geometry: {}", e)))
}

pub fn polygon_to_geojson(polygon: &Polygon<f64>) -> DssResult<String> {
    render(geojson::Value::from(polygon))
}

pub fn multipolygon_to_geojson(multi: &MultiPolygon<f64>) -> DssResult<String> {
    render(geojson::Value::from(multi))
}

pub fn polygon_from_geojson(json: &str) -> DssResult<Polygon<f64>> {
    match parse(json)? {
        Geometry::Polygon(p) => Ok(p),
        Geometry::MultiPolygon(mut m) if m.0.len() == 1 => Ok(m.0.remove(0)),
        other => Err(DssError::Validation(format!(
            "Expected a Polygon, got {}",
            geometry_kind(&other)
        ))),
    }
}

/// Accepts Polygon or MultiPolygon; a Polygon is promoted.
pub fn multipolygon_from_geojson(json: &str) -> DssResult<MultiPolygon<f64>> {
    match parse(json)? {
        Geometry::Polygon(p) => Ok(MultiPolygon::new(vec![p])),
        Geometry::MultiPolygon(m) => Ok(m),
        other => Err(DssError::Validation(format!(
            "Expected a Polygon or MultiPolygon, got {}",
            geometry_kind(&other)
        ))),
    }
}

fn geometry_kind(g: &Geometry<f64>) -> &'static str {
    match g {
        Geometry::Point(_) => "Point",
        Geometry::Line(_) => "Line",
        Geometry::LineString(_) => "LineString",
        Geometry::Polygon(_) => "Polygon",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::MultiPolygon(_) => "MultiPolygon",
        Geometry::GeometryCollection(_) => "GeometryCollection",
        Geometry::Rect(_) => "Rect",
        Geometry::Triangle(_) => "Triangle",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dss_common::BoundingBox;

    #[test]
    fn test_polygon_geojson_round_trip() {
        let poly = BoundingBox::new(36.0, -1.5, 37.0, -0.5).to_polygon();
        let json = polygon_to_geojson(&poly).unwrap();
        assert!(json.contains("\"Polygon\""));
        assert_eq!(polygon_from_geojson(&json).unwrap(), poly);
    }

    #[test]
    fn test_polygon_promoted_to_multipolygon() {
        let json = r#"{"type":"Polygon","coordinates":[[[0,0],[1,0],[1,1],[0,1],[0,0]]]}"#;
        let multi = multipolygon_from_geojson(json).unwrap();
        assert_eq!(multi.0.len(), 1);
    }

    #[test]
    fn test_point_rejected() {
        let json = r#"{"type":"Point","coordinates":[1,2]}"#;
        assert!(matches!(
            multipolygon_from_geojson(json),
            Err(DssError::Validation(_))
        ));
    }
}
