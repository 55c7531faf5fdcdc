//! Point queries end to end: ingest -> catalog -> extraction -> ensemble -> lineage.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{TimeZone, Utc};
use uuid::Uuid;

use dss_common::{
    DateRange, DssError, DssResult, GeoPoint, Lookup, NewObservation, NewRasterAsset, Observation,
    ObservationSource, RasterAsset, Zone, ZoneUpsert,
};
use ingestion::{IngestConfig, IngestMetadata, IngestReceipt, RasterCatalogIngestor};
use prediction::schema::{NDVI_MEAN, PRECIP_MEAN, TEMP_MEAN};
use prediction::{BlendMode, BlendWeights, FeatureSource, LimitingFactor, ModelStatus, PointQueryService, PredictionConfig};
use raster_processor::RasterConfig;
use storage::{MemoryCatalog, ObjectStorage, ObjectStorageConfig, SpatialCatalog, ZoneYear};
use test_utils::{
    assert_approx_eq, bbox, create_constant_grid, create_ndvi_grid, full_attributes,
    init_test_tracing, rect_polygon, temp_test_dir, zone_upsert, GeoTiffFixture,
};

const STACK_BANDS: [&str; 6] = ["ndvi", "precip", "et", "elevation", "soil_texture", "temp"];

const LINEAR_MODEL: &str = r#"{
    "feature_names": ["ndvi_mean", "precip_mean", "et_mean", "elevation_mean", "soil_texture", "temp_mean"],
    "model": { "type": "linear", "intercept": 1.0, "coefficients": [2.0, 0.0, 0.0, 0.0, 0.0, 0.0] }
}"#;

/// 40x30 stack over (36.0..36.4, -0.3..0.0) with mild water stress.
fn stack(ndvi: Vec<f32>) -> (GeoTiffFixture, Bytes) {
    let (w, h) = (40, 30);
    let fixture = GeoTiffFixture::new(w, h)
        .with_band(Some(STACK_BANDS[0]), ndvi)
        .with_band(Some(STACK_BANDS[1]), create_constant_grid(w, h, 2.25))
        .with_band(Some(STACK_BANDS[2]), create_constant_grid(w, h, 3.0))
        .with_band(Some(STACK_BANDS[3]), create_constant_grid(w, h, 1700.0))
        .with_band(Some(STACK_BANDS[4]), create_constant_grid(w, h, 3.0))
        .with_band(Some(STACK_BANDS[5]), create_constant_grid(w, h, 22.0));

    let dir = temp_test_dir();
    let path = fixture.write_in(dir.path(), "stack.tif");
    let bytes = Bytes::from(std::fs::read(path).unwrap());
    (fixture, bytes)
}

struct Harness {
    storage: Arc<ObjectStorage>,
    catalog: Arc<MemoryCatalog>,
    ingestor: RasterCatalogIngestor,
}

impl Harness {
    fn new() -> Self {
        init_test_tracing();
        let storage = Arc::new(ObjectStorage::new(&ObjectStorageConfig::memory()).unwrap());
        let catalog = Arc::new(MemoryCatalog::new());
        let config = IngestConfig {
            raster: RasterConfig {
                tile_size: 16,
                ..RasterConfig::default()
            },
            scratch_root: None,
        };
        let ingestor = RasterCatalogIngestor::new(storage.clone(), catalog.clone(), config);
        Self {
            storage,
            catalog,
            ingestor,
        }
    }

    async fn ingest(&self, bytes: Bytes, captured_at: &str) -> IngestReceipt {
        let metadata =
            IngestMetadata::new("PredictorStack", captured_at, "stack.tif").with_crop("maize");
        self.ingestor.ingest(bytes, metadata).await.unwrap()
    }

    fn service(&self, config: PredictionConfig) -> PointQueryService {
        PointQueryService::new(self.catalog.clone(), self.storage.clone(), config)
    }
}

fn march() -> DateRange {
    DateRange::parse("2024-03-01", "2024-03-31").unwrap()
}

fn write_model(dir: &std::path::Path) -> PathBuf {
    let path = dir.join("model.json");
    std::fs::write(&path, LINEAR_MODEL).unwrap();
    path
}

#[tokio::test(flavor = "multi_thread")]
async fn test_query_samples_ingested_stack_and_blends() {
    let harness = Harness::new();
    let (fixture, bytes) = stack(create_ndvi_grid(40, 30));
    let receipt = harness.ingest(bytes, "2024-03-15T00:00:00Z").await;

    let models = temp_test_dir();
    let service = harness.service(PredictionConfig {
        model_path: Some(write_model(models.path())),
        ..PredictionConfig::default()
    });

    let (col, row) = (25, 11);
    let (lon, lat) = fixture.pixel_center(col, row);
    let result = service.query_point(GeoPoint::new(lon, lat), &march()).await.unwrap();

    // Band order maps positionally onto the feature schema.
    assert_eq!(result.features.len(), 6);
    for (band, feature) in result.features.iter().enumerate() {
        assert_eq!(feature.source, FeatureSource::Raster, "{}", feature.name);
        assert_approx_eq!(feature.value, fixture.value(band, col, row), 1e-6);
    }

    let ndvi = fixture.value(0, col, row) as f64;
    assert!(ndvi > 0.4 && ndvi < 0.7);
    let statistical = 1.0 + 2.0 * ndvi;
    let mechanistic = 3.5 * 0.5;
    assert_approx_eq!(result.predicted_yield, 0.7 * statistical + 0.3 * mechanistic, 1e-6);

    let provenance = &result.provenance;
    assert_eq!(provenance.schema_version, "v1");
    assert_eq!(provenance.asset_id, Some(receipt.asset_id));
    assert_eq!(provenance.asset_url.as_deref(), Some(receipt.asset_url.as_str()));
    assert_eq!(provenance.mode, BlendMode::Ensemble);
    assert_eq!(provenance.weights, BlendWeights::new(0.7, 0.3));
    assert_eq!(provenance.limiting_factor, LimitingFactor::Water);
    assert_eq!(provenance.water_stress, Some(0.5));
    assert!(provenance.defaults_used.is_empty());
    // No zone was imported.
    assert_eq!(provenance.warnings.len(), 1);

    assert_eq!(result.time_series.len(), 1);
    assert_eq!(result.time_series[0].asset_id, receipt.asset_id);
    assert_approx_eq!(result.time_series[0].value, ndvi, 1e-6);

    assert!(matches!(
        service.model_status().await,
        ModelStatus::Loaded { features: 6, .. }
    ));
}

#[tokio::test]
async fn test_empty_catalog_returns_defaults() {
    let harness = Harness::new();
    let service = harness.service(PredictionConfig::default());

    let result = service
        .query_point(GeoPoint::new(36.8, -1.3), &march())
        .await
        .unwrap();

    assert!(result.features.iter().all(|f| f.source == FeatureSource::Default));
    assert_eq!(result.provenance.defaults_used.len(), 6);
    assert_eq!(result.provenance.asset_id, None);
    assert_eq!(result.provenance.zone, None);
    assert_eq!(result.provenance.warnings.len(), 2);
    assert!(result.time_series.is_empty());

    // Defaults give an unstressed crop at full potential.
    assert_eq!(result.provenance.mode, BlendMode::MechanisticOnly);
    assert_eq!(result.provenance.statistical, None);
    assert_eq!(result.predicted_yield, 3.5);
    assert_eq!(result.provenance.limiting_factor, LimitingFactor::None);
}

#[tokio::test]
async fn test_zone_attributes_fill_missing_raster() {
    let harness = Harness::new();
    harness
        .catalog
        .upsert_zone(zone_upsert("KE047001", 2024, bbox::NAIROBI, full_attributes()))
        .await
        .unwrap();
    let service = harness.service(PredictionConfig::default());

    let result = service
        .query_point(GeoPoint::new(36.5, -0.25), &march())
        .await
        .unwrap();

    let zone = result.provenance.zone.as_ref().unwrap();
    assert_eq!(zone.zone_code, "KE047001");
    assert_eq!(zone.year, 2024);
    assert!(result.features.iter().all(|f| f.source == FeatureSource::Zone));

    let value = |name: &str| result.features.iter().find(|f| f.name == name).unwrap().value;
    assert_eq!(value(NDVI_MEAN), 0.61);
    assert_eq!(value(PRECIP_MEAN), 4.2);
    assert_eq!(value(TEMP_MEAN), 22.4);

    assert_approx_eq!(result.predicted_yield, 3.5 * 4.2 / 4.5, 1e-9);
    assert_eq!(result.provenance.limiting_factor, LimitingFactor::None);
}

#[tokio::test]
async fn test_latest_zone_year_used_when_window_year_missing() {
    let harness = Harness::new();
    let mut older = full_attributes();
    older.precipitation_mean = Some(1.0);
    harness
        .catalog
        .upsert_zone(zone_upsert("KE047001", 2022, bbox::NAIROBI, older))
        .await
        .unwrap();
    harness
        .catalog
        .upsert_zone(zone_upsert("KE047001", 2023, bbox::NAIROBI, full_attributes()))
        .await
        .unwrap();
    let service = harness.service(PredictionConfig::default());

    let result = service
        .query_point(GeoPoint::new(36.5, -0.25), &march())
        .await
        .unwrap();

    assert_eq!(result.provenance.zone.as_ref().map(|z| z.year), Some(2023));
    assert_eq!(result.provenance.water_stress.map(|w| (w * 45.0).round()), Some(42.0));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unreadable_artifact_degrades_to_defaults() {
    let harness = Harness::new();
    let captured_at = Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap();
    let asset = harness
        .catalog
        .register_asset(NewRasterAsset {
            url: harness.storage.url_for("PredictorStack/20240310T000000Z/stack.zarr"),
            captured_at,
            asset_type: "PredictorStack".to_string(),
            crop_id: None,
            footprint: rect_polygon(bbox::NAIROBI),
            bands: STACK_BANDS.iter().map(|b| b.to_string()).collect(),
        })
        .await
        .unwrap();
    let service = harness.service(PredictionConfig::default());

    let result = service
        .query_point(GeoPoint::new(36.5, -0.25), &march())
        .await
        .unwrap();

    assert_eq!(result.provenance.asset_id, Some(asset.id));
    assert_eq!(result.provenance.defaults_used.len(), 6);
    assert!(result
        .provenance
        .warnings
        .iter()
        .any(|w| w.contains(&asset.id.to_string())));
    assert!(result.time_series.is_empty());
    assert_eq!(result.predicted_yield, 3.5);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unreadable_earlier_asset_falls_through_to_next() {
    let harness = Harness::new();
    let broken = harness
        .catalog
        .register_asset(NewRasterAsset {
            url: harness.storage.url_for("PredictorStack/20240305T000000Z/missing.zarr"),
            captured_at: Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap(),
            asset_type: "PredictorStack".to_string(),
            crop_id: None,
            footprint: rect_polygon(bbox::NAIROBI),
            bands: STACK_BANDS.iter().map(|b| b.to_string()).collect(),
        })
        .await
        .unwrap();
    let (fixture, bytes) = stack(create_ndvi_grid(40, 30));
    let receipt = harness.ingest(bytes, "2024-03-15T00:00:00Z").await;
    let service = harness.service(PredictionConfig::default());

    let (col, row) = (12, 20);
    let (lon, lat) = fixture.pixel_center(col, row);
    let result = service.query_point(GeoPoint::new(lon, lat), &march()).await.unwrap();

    assert_eq!(result.provenance.asset_id, Some(receipt.asset_id));
    assert!(result.provenance.defaults_used.is_empty());
    for (band, feature) in result.features.iter().enumerate() {
        assert_eq!(feature.source, FeatureSource::Raster, "{}", feature.name);
        assert_approx_eq!(feature.value, fixture.value(band, col, row), 1e-6);
    }
    assert!(result
        .provenance
        .warnings
        .iter()
        .any(|w| w.contains(&broken.id.to_string())));
}

#[tokio::test]
async fn test_invalid_point_is_rejected() {
    let harness = Harness::new();
    let service = harness.service(PredictionConfig::default());

    let err = service
        .query_point(GeoPoint::new(181.0, 0.0), &march())
        .await
        .unwrap_err();
    assert!(matches!(err, DssError::Validation(_)));
    assert_eq!(harness.catalog.observation_count().await, 0);
}

#[tokio::test]
async fn test_prediction_is_recorded_as_lineage() {
    let harness = Harness::new();
    let service = harness.service(PredictionConfig::default());
    let point = GeoPoint::new(36.8, -1.3);

    let result = service.query_point(point, &march()).await.unwrap();
    let lineage_id = result.provenance.lineage_id.unwrap();

    let observations = harness.catalog.observations_near(point, 10.0).await.unwrap();
    assert_eq!(observations.len(), 1);
    let observation = &observations[0];
    assert_eq!(observation.id, lineage_id);
    assert_eq!(observation.source, ObservationSource::Prediction);
    assert_eq!(observation.crop_id, "maize");
    assert_eq!(observation.year, 2024);
    assert_eq!(observation.yield_value, result.predicted_yield);

    let snapshot = observation.features.as_ref().unwrap();
    assert_eq!(snapshot["schema"], "v1");
    assert_eq!(snapshot["prediction"]["limiting_factor"], "none");
}

#[tokio::test]
async fn test_lineage_can_be_disabled() {
    let harness = Harness::new();
    let service = harness.service(PredictionConfig {
        lineage_enabled: false,
        ..PredictionConfig::default()
    });

    let result = service
        .query_point(GeoPoint::new(36.8, -1.3), &march())
        .await
        .unwrap();
    assert_eq!(result.provenance.lineage_id, None);
    assert_eq!(harness.catalog.observation_count().await, 0);
}

/// Catalog whose observation writes always fail.
struct ReadOnlyCatalog(MemoryCatalog);

#[async_trait]
impl SpatialCatalog for ReadOnlyCatalog {
    async fn register_asset(&self, asset: NewRasterAsset) -> DssResult<RasterAsset> {
        self.0.register_asset(asset).await
    }

    async fn get_asset(&self, id: Uuid) -> DssResult<Lookup<RasterAsset>> {
        self.0.get_asset(id).await
    }

    async fn list_assets(&self, asset_type: Option<&str>) -> DssResult<Vec<RasterAsset>> {
        self.0.list_assets(asset_type).await
    }

    async fn assets_intersecting(
        &self,
        point: GeoPoint,
        window: &DateRange,
    ) -> DssResult<Vec<RasterAsset>> {
        self.0.assets_intersecting(point, window).await
    }

    async fn upsert_zone(&self, zone: ZoneUpsert) -> DssResult<Zone> {
        self.0.upsert_zone(zone).await
    }

    async fn zone_by_code(&self, zone_code: &str, year: i32) -> DssResult<Lookup<Zone>> {
        self.0.zone_by_code(zone_code, year).await
    }

    async fn zone_containing(&self, point: GeoPoint, year: ZoneYear) -> DssResult<Lookup<Zone>> {
        self.0.zone_containing(point, year).await
    }

    async fn list_zones(&self, year: Option<i32>) -> DssResult<Vec<Zone>> {
        self.0.list_zones(year).await
    }

    async fn record_observation(&self, _observation: NewObservation) -> DssResult<Observation> {
        Err(DssError::Catalog("read-only replica".to_string()))
    }

    async fn observations_near(
        &self,
        point: GeoPoint,
        radius_m: f64,
    ) -> DssResult<Vec<Observation>> {
        self.0.observations_near(point, radius_m).await
    }
}

#[tokio::test]
async fn test_lineage_failure_still_returns_prediction() {
    init_test_tracing();
    let storage = Arc::new(ObjectStorage::new(&ObjectStorageConfig::memory()).unwrap());
    let catalog = Arc::new(ReadOnlyCatalog(MemoryCatalog::new()));
    let service = PointQueryService::new(catalog.clone(), storage, PredictionConfig::default());

    let result = service
        .query_point(GeoPoint::new(36.8, -1.3), &march())
        .await
        .unwrap();

    assert_eq!(result.predicted_yield, 3.5);
    assert_eq!(result.provenance.lineage_id, None);
    assert_eq!(catalog.0.observation_count().await, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_time_series_keeps_most_recent_in_order() {
    let harness = Harness::new();
    let mut receipts = Vec::new();
    for (ndvi, day) in [(0.3, "05"), (0.5, "15"), (0.75, "25")] {
        let (_, bytes) = stack(create_constant_grid(40, 30, ndvi));
        receipts.push(harness.ingest(bytes, &format!("2024-03-{}T00:00:00Z", day)).await);
    }
    let service = harness.service(PredictionConfig {
        time_series_limit: 2,
        ..PredictionConfig::default()
    });

    let result = service
        .query_point(GeoPoint::new(36.2, -0.15), &march())
        .await
        .unwrap();

    // The earliest stack in the window supplies the features.
    assert_eq!(result.provenance.asset_id, Some(receipts[0].asset_id));
    assert_approx_eq!(result.features[0].value, 0.3, 1e-6);

    let series = &result.time_series;
    assert_eq!(series.len(), 2);
    assert_eq!(series[0].asset_id, receipts[1].asset_id);
    assert_eq!(series[1].asset_id, receipts[2].asset_id);
    assert!(series[0].date < series[1].date);
    assert_eq!(series[0].value, 0.5);
    assert_eq!(series[1].value, 0.75);
}

#[tokio::test]
async fn test_broken_model_artifact_falls_back_to_mechanistic() {
    let harness = Harness::new();
    let dir = temp_test_dir();
    let service = harness.service(PredictionConfig {
        model_path: Some(dir.path().join("missing.json")),
        ..PredictionConfig::default()
    });
    assert_eq!(service.model_status().await, ModelStatus::NotLoaded);

    let result = service
        .query_point(GeoPoint::new(36.8, -1.3), &march())
        .await
        .unwrap();

    assert_eq!(result.provenance.mode, BlendMode::MechanisticOnly);
    assert!(matches!(service.model_status().await, ModelStatus::Failed { .. }));

    // A fixed artifact is picked up on reload.
    std::fs::write(dir.path().join("missing.json"), LINEAR_MODEL).unwrap();
    service.ensemble().models().reload().await.unwrap();
    let result = service
        .query_point(GeoPoint::new(36.8, -1.3), &march())
        .await
        .unwrap();
    assert_eq!(result.provenance.mode, BlendMode::Ensemble);
    // Default vegetation index 0.52 sits inside the normal band.
    assert_approx_eq!(result.predicted_yield, 0.7 * 2.04 + 0.3 * 3.5, 1e-9);
}
