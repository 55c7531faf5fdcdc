//! Bulk tabular imports: zone boundaries, zone statistics and observations.
//!
//! Malformed rows are skipped with a warning and counted; a document that
//! cannot be parsed at all is a validation error.

use std::collections::HashMap;

use geo::{Geometry, MultiPolygon};
use serde_json::{Map, Value};
use tracing::{info, warn};

use dss_common::{
    DssError, DssResult, GeoPoint, NewObservation, ObservationSource, ZoneAttributes, ZoneUpsert,
};
use storage::SpatialCatalog;

/// Year assigned to boundaries that do not state one.
pub const DEFAULT_BOUNDARY_YEAR: i32 = 2024;

const ZONE_CODE_KEYS: [&str; 4] = ["ADM2_PCODE", "zone_code", "ward_id", "id"];
const ZONE_NAME_KEYS: [&str; 3] = ["ADM2_EN", "name", "ward_name"];
const PARENT_REGION_KEYS: [&str; 3] = ["ADM1_EN", "parent_region", "county_name"];

/// Row counts of one import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub rows: usize,
    pub upserted: usize,
    pub skipped: usize,
}

/// Upsert zone polygons from a GeoJSON FeatureCollection.
///
/// Statistics already stored for a (zone, year) are kept.
pub async fn import_zone_boundaries(
    catalog: &dyn SpatialCatalog,
    geojson_text: &str,
) -> DssResult<ImportSummary> {
    let parsed: geojson::GeoJson = geojson_text
        .parse()
        .map_err(|e| DssError::Validation(format!("Invalid GeoJSON document: {}", e)))?;
    let collection = match parsed {
        geojson::GeoJson::FeatureCollection(fc) => fc,
        _ => {
            return Err(DssError::Validation(
                "Zone boundaries must be a FeatureCollection".to_string(),
            ))
        }
    };

    let mut summary = ImportSummary::default();
    for (index, feature) in collection.features.into_iter().enumerate() {
        summary.rows += 1;
        let empty = Map::new();
        let props = feature.properties.as_ref().unwrap_or(&empty);

        let Some(code) = first_string(props, &ZONE_CODE_KEYS) else {
            warn!(feature = index, "Skipping boundary without a zone code");
            summary.skipped += 1;
            continue;
        };
        let geometry = match feature.geometry.map(to_multipolygon) {
            Some(Ok(g)) => g,
            Some(Err(reason)) => {
                warn!(feature = index, zone_code = %code, reason = %reason, "Skipping boundary");
                summary.skipped += 1;
                continue;
            }
            None => {
                warn!(feature = index, zone_code = %code, "Skipping boundary without geometry");
                summary.skipped += 1;
                continue;
            }
        };
        let year = props
            .get("year")
            .and_then(value_as_i32)
            .unwrap_or(DEFAULT_BOUNDARY_YEAR);

        let mut upsert = ZoneUpsert::new(code, year);
        upsert.name = first_string(props, &ZONE_NAME_KEYS);
        upsert.parent_region = first_string(props, &PARENT_REGION_KEYS);
        upsert.geometry = Some(geometry);

        apply(catalog.upsert_zone(upsert).await.map(|_| ()), index, &mut summary)?;
    }

    info!(
        rows = summary.rows,
        upserted = summary.upserted,
        skipped = summary.skipped,
        "Imported zone boundaries"
    );
    Ok(summary)
}

/// Upsert yearly zone statistics from CSV.
///
/// Recognized columns (case-insensitive): zone code (`zone_code`, `ward_id`,
/// `adm2_pcode`, `id`), `year`, and the statistics `ndvi_mean|ndvi`,
/// `precip_mean|precip`, `et_mean|et`, `temp_mean|temp`,
/// `elevation_mean|elevation`, `soil_texture`. Empty cells leave the stored
/// value untouched, as does a missing geometry.
pub async fn import_zone_statistics(
    catalog: &dyn SpatialCatalog,
    csv_text: &str,
) -> DssResult<ImportSummary> {
    let table = CsvTable::parse(csv_text)?;
    let code_col = table
        .column(&["zone_code", "ward_id", "adm2_pcode", "id"])
        .ok_or_else(|| DssError::Validation("Statistics CSV has no zone code column".to_string()))?;
    let year_col = table
        .column(&["year"])
        .ok_or_else(|| DssError::Validation("Statistics CSV has no year column".to_string()))?;

    let ndvi = table.column(&["ndvi_mean", "ndvi"]);
    let precip = table.column(&["precip_mean", "precip", "precipitation_mean"]);
    let et = table.column(&["et_mean", "et", "evapotranspiration_mean"]);
    let temp = table.column(&["temp_mean", "temp", "temperature_mean"]);
    let elevation = table.column(&["elevation_mean", "elevation"]);
    let soil = table.column(&["soil_texture", "soil_texture_index"]);

    let mut summary = ImportSummary::default();
    for (index, row) in table.rows.iter().enumerate() {
        summary.rows += 1;

        let code = row.text(code_col);
        let year = row.text(year_col).and_then(|s| s.parse::<i32>().ok());
        let (Some(code), Some(year)) = (code, year) else {
            warn!(row = index + 1, "Skipping statistics row without zone code or year");
            summary.skipped += 1;
            continue;
        };

        let parsed = (|| -> Result<ZoneAttributes, String> {
            Ok(ZoneAttributes {
                vegetation_index_mean: row.number(ndvi)?,
                precipitation_mean: row.number(precip)?,
                evapotranspiration_mean: row.number(et)?,
                temperature_mean: row.number(temp)?,
                elevation: row.number(elevation)?,
                soil_texture_index: row.number(soil)?,
            })
        })();
        let attributes = match parsed {
            Ok(a) => a,
            Err(reason) => {
                warn!(row = index + 1, zone_code = %code, reason = %reason, "Skipping statistics row");
                summary.skipped += 1;
                continue;
            }
        };

        let mut upsert = ZoneUpsert::new(code, year);
        upsert.attributes = attributes;
        apply(catalog.upsert_zone(upsert).await.map(|_| ()), index, &mut summary)?;
    }

    info!(
        rows = summary.rows,
        upserted = summary.upserted,
        skipped = summary.skipped,
        "Imported zone statistics"
    );
    Ok(summary)
}

/// Append yield observations from CSV.
///
/// Columns: `longitude|lon`, `latitude|lat`, `year`, `yield_value|yield`,
/// optional `crop_id|crop` (else `default_crop`), and optional `ndvi`,
/// `precip`, `temp` which are kept as the feature snapshot.
pub async fn import_observations(
    catalog: &dyn SpatialCatalog,
    csv_text: &str,
    default_crop: &str,
) -> DssResult<ImportSummary> {
    let table = CsvTable::parse(csv_text)?;
    let required = |names: &[&str], label: &str| {
        table
            .column(names)
            .ok_or_else(|| DssError::Validation(format!("Observations CSV has no {} column", label)))
    };
    let lon_col = required(&["longitude", "lon"], "longitude")?;
    let lat_col = required(&["latitude", "lat"], "latitude")?;
    let year_col = required(&["year"], "year")?;
    let yield_col = required(&["yield_value", "yield"], "yield")?;
    let crop_col = table.column(&["crop_id", "crop"]);
    let snapshot_cols: Vec<(&str, Option<usize>)> = ["ndvi", "precip", "temp"]
        .iter()
        .map(|name| (*name, table.column(&[name])))
        .collect();

    let mut summary = ImportSummary::default();
    for (index, row) in table.rows.iter().enumerate() {
        summary.rows += 1;

        let parsed = (|| -> Result<NewObservation, String> {
            let lon = row.number(Some(lon_col))?.ok_or("missing longitude")?;
            let lat = row.number(Some(lat_col))?.ok_or("missing latitude")?;
            let yield_value = row.number(Some(yield_col))?.ok_or("missing yield")?;
            let year = row
                .text(year_col)
                .and_then(|s| s.parse::<i32>().ok())
                .ok_or("missing or invalid year")?;
            let crop_id = crop_col
                .and_then(|c| row.text(c))
                .unwrap_or(default_crop)
                .to_string();

            let mut snapshot = Map::new();
            for (name, col) in &snapshot_cols {
                if let Some(v) = row.number(*col)? {
                    snapshot.insert(name.to_string(), Value::from(v));
                }
            }

            Ok(NewObservation {
                crop_id,
                year,
                yield_value,
                location: GeoPoint::new(lon, lat),
                features: (!snapshot.is_empty()).then_some(Value::Object(snapshot)),
                source: ObservationSource::Import,
            })
        })();

        match parsed {
            Ok(observation) => apply(
                catalog.record_observation(observation).await.map(|_| ()),
                index,
                &mut summary,
            )?,
            Err(reason) => {
                warn!(row = index + 1, reason = %reason, "Skipping observation row");
                summary.skipped += 1;
            }
        }
    }

    info!(
        rows = summary.rows,
        upserted = summary.upserted,
        skipped = summary.skipped,
        "Imported observations"
    );
    Ok(summary)
}

/// Count a write; validation failures skip the row, anything else aborts.
fn apply(result: DssResult<()>, index: usize, summary: &mut ImportSummary) -> DssResult<()> {
    match result {
        Ok(()) => {
            summary.upserted += 1;
            Ok(())
        }
        Err(DssError::Validation(reason)) => {
            warn!(row = index + 1, reason = %reason, "Skipping invalid row");
            summary.skipped += 1;
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn to_multipolygon(geometry: geojson::Geometry) -> Result<MultiPolygon<f64>, String> {
    match Geometry::<f64>::try_from(geometry).map_err(|e| e.to_string())? {
        Geometry::Polygon(p) => Ok(MultiPolygon::new(vec![p])),
        Geometry::MultiPolygon(m) if !m.0.is_empty() => Ok(m),
        _ => Err("geometry is not a Polygon or MultiPolygon".to_string()),
    }
}

fn first_string(props: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match props.get(*key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn value_as_i32(value: &Value) -> Option<i32> {
    match value {
        Value::Number(n) => n.as_i64().and_then(|v| i32::try_from(v).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// A CSV document with case-insensitive header lookup.
struct CsvTable {
    headers: HashMap<String, usize>,
    rows: Vec<CsvRow>,
}

struct CsvRow(csv::StringRecord);

impl CsvTable {
    fn parse(text: &str) -> DssResult<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(text.as_bytes());

        let headers = reader
            .headers()
            .map_err(|e| DssError::Validation(format!("Invalid CSV header: {}", e)))?
            .iter()
            .enumerate()
            .map(|(i, h)| (h.to_ascii_lowercase(), i))
            .collect();

        let rows = reader
            .records()
            .map(|r| r.map(CsvRow))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| DssError::Validation(format!("Invalid CSV: {}", e)))?;

        Ok(Self { headers, rows })
    }

    fn column(&self, aliases: &[&str]) -> Option<usize> {
        aliases.iter().find_map(|a| self.headers.get(*a).copied())
    }
}

impl CsvRow {
    fn text(&self, col: usize) -> Option<&str> {
        self.0.get(col).filter(|s| !s.is_empty())
    }

    /// Empty or absent cells are `None`; unparsable cells are an error.
    fn number(&self, col: Option<usize>) -> Result<Option<f64>, String> {
        match col.and_then(|c| self.text(c)) {
            None => Ok(None),
            Some(s) => match s.parse::<f64>() {
                Ok(v) if v.is_finite() => Ok(Some(v)),
                _ => Err(format!("'{}' is not a number", s)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dss_common::Lookup;
    use storage::{MemoryCatalog, ZoneYear};
    use test_utils::{BOUNDARIES_GEOJSON, OBSERVATIONS_CSV, ZONE_STATS_CSV};

    #[tokio::test]
    async fn test_import_boundaries() {
        let catalog = MemoryCatalog::new();
        let summary = import_zone_boundaries(&catalog, BOUNDARIES_GEOJSON).await.unwrap();
        assert_eq!(summary, ImportSummary { rows: 3, upserted: 2, skipped: 1 });

        let Lookup::Found(zone) = catalog.zone_by_code("KE047001", DEFAULT_BOUNDARY_YEAR).await.unwrap() else {
            panic!("boundary not imported");
        };
        assert_eq!(zone.name.as_deref(), Some("Westlands"));
        assert_eq!(zone.parent_region.as_deref(), Some("Nairobi"));
        assert!(zone.geometry.is_some());

        // Year taken from properties.
        assert!(catalog.zone_by_code("KE032001", 2023).await.unwrap().is_found());
    }

    #[tokio::test]
    async fn test_statistics_keep_boundary_geometry() {
        let catalog = MemoryCatalog::new();
        import_zone_boundaries(&catalog, BOUNDARIES_GEOJSON).await.unwrap();
        let summary = import_zone_statistics(&catalog, ZONE_STATS_CSV).await.unwrap();
        assert_eq!(summary, ImportSummary { rows: 3, upserted: 2, skipped: 1 });

        let zone = catalog
            .zone_containing(GeoPoint::new(36.5, -0.25), ZoneYear::Exact(2024))
            .await
            .unwrap()
            .found()
            .expect("zone with geometry and statistics");
        assert_eq!(zone.zone_code, "KE047001");
        assert_eq!(zone.attributes.vegetation_index_mean, Some(0.64));
        assert_eq!(zone.attributes.soil_texture_index, Some(2.0));

        // Empty cells stay unset.
        let other = catalog.zone_by_code("KE032001", 2024).await.unwrap().found().unwrap();
        assert_eq!(other.attributes.temperature_mean, None);
        assert_eq!(other.attributes.elevation, Some(1880.0));
    }

    #[tokio::test]
    async fn test_import_observations_skips_bad_rows() {
        let catalog = MemoryCatalog::new();
        let summary = import_observations(&catalog, OBSERVATIONS_CSV, "maize").await.unwrap();
        assert_eq!(summary, ImportSummary { rows: 3, upserted: 2, skipped: 1 });

        let near = catalog
            .observations_near(GeoPoint::new(36.815, -0.285), 5_000.0)
            .await
            .unwrap();
        assert_eq!(near.len(), 2);
        assert!(near.iter().all(|o| o.source == ObservationSource::Import));
    }

    #[tokio::test]
    async fn test_missing_required_column_is_validation_error() {
        let catalog = MemoryCatalog::new();
        let result = import_observations(&catalog, "lon,lat\n1,2\n", "maize").await;
        assert!(matches!(result, Err(DssError::Validation(_))));

        let result = import_zone_boundaries(&catalog, "{\"type\":\"Point\",\"coordinates\":[0,0]}").await;
        assert!(matches!(result, Err(DssError::Validation(_))));
    }
}
