//! Common fixtures for catalog and prediction tests.

use geo::{MultiPolygon, Polygon};

use dss_common::{BoundingBox, ZoneAttributes, ZoneUpsert};

/// Bounding boxes as (min_lon, min_lat, max_lon, max_lat).
pub mod bbox {
    /// Around Nairobi, matching `GeoTiffFixture::new(100, 50)`.
    pub const NAIROBI: (f64, f64, f64, f64) = (36.0, -0.5, 37.0, 0.0);
}

pub fn rect_polygon(extent: (f64, f64, f64, f64)) -> Polygon<f64> {
    BoundingBox::new(extent.0, extent.1, extent.2, extent.3).to_polygon()
}

pub fn rect_multipolygon(extent: (f64, f64, f64, f64)) -> MultiPolygon<f64> {
    MultiPolygon::new(vec![rect_polygon(extent)])
}

/// Fully populated yearly statistics.
pub fn full_attributes() -> ZoneAttributes {
    ZoneAttributes {
        vegetation_index_mean: Some(0.61),
        precipitation_mean: Some(4.2),
        evapotranspiration_mean: Some(3.9),
        temperature_mean: Some(22.4),
        elevation: Some(1720.0),
        soil_texture_index: Some(3.0),
    }
}

/// A rectangular zone with the given statistics.
pub fn zone_upsert(
    code: &str,
    year: i32,
    extent: (f64, f64, f64, f64),
    attributes: ZoneAttributes,
) -> ZoneUpsert {
    let mut zone = ZoneUpsert::new(code, year);
    zone.name = Some(format!("Zone {}", code));
    zone.parent_region = Some("Test County".to_string());
    zone.geometry = Some(rect_multipolygon(extent));
    zone.attributes = attributes;
    zone
}

/// Administrative boundaries in the layout produced by common GIS exports.
pub const BOUNDARIES_GEOJSON: &str = r#"{
  "type": "FeatureCollection",
  "features": [
    {
      "type": "Feature",
      "properties": { "ADM2_PCODE": "KE047001", "ADM2_EN": "Westlands", "ADM1_EN": "Nairobi" },
      "geometry": {
        "type": "Polygon",
        "coordinates": [[[36.0, -0.5], [37.0, -0.5], [37.0, 0.0], [36.0, 0.0], [36.0, -0.5]]]
      }
    },
    {
      "type": "Feature",
      "properties": { "zone_code": "KE032001", "name": "Naivasha", "parent_region": "Nakuru", "year": 2023 },
      "geometry": {
        "type": "MultiPolygon",
        "coordinates": [[[[35.5, -0.6], [36.0, -0.6], [36.0, 0.0], [35.5, 0.0], [35.5, -0.6]]]]
      }
    },
    {
      "type": "Feature",
      "properties": { "name": "no code" },
      "geometry": {
        "type": "Polygon",
        "coordinates": [[[30.0, 0.0], [31.0, 0.0], [31.0, 1.0], [30.0, 0.0]]]
      }
    }
  ]
}"#;

/// Yearly zone statistics with aliased column names.
pub const ZONE_STATS_CSV: &str = "\
ward_id,year,ndvi_mean,precip_mean,et_mean,temp_mean,elevation,soil_texture
KE047001,2024,0.64,4.8,3.6,21.9,1795,2
KE032001,2024,0.48,3.1,4.4,,1880,
,2024,0.5,1,1,1,1,1
";

/// Historical yield observations.
pub const OBSERVATIONS_CSV: &str = "\
crop_id,year,yield,lon,lat
maize,2021,2.9,36.81,-0.28
maize,2022,3.4,36.82,-0.29
beans,2022,not_a_number,36.80,-0.27
";
