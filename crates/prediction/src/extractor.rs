//! Point feature extraction from the catalog and stored rasters.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use dss_common::{DateRange, DssError, DssResult, GeoPoint, RasterAsset, Zone};
use raster_processor::{PointSample, PointSampler};
use storage::{ObjectStorage, SpatialCatalog, ZoneYear};

use crate::schema::{FeatureMap, FeatureSchema, FeatureSource};

/// Zone that contributed attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneRef {
    pub id: Uuid,
    pub zone_code: String,
    pub name: Option<String>,
    pub year: i32,
}

impl From<&Zone> for ZoneRef {
    fn from(zone: &Zone) -> Self {
        Self {
            id: zone.id,
            zone_code: zone.zone_code.clone(),
            name: zone.name.clone(),
            year: zone.year,
        }
    }
}

/// One sample of a feature band over time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub date: DateTime<Utc>,
    pub value: f64,
    pub asset_id: Uuid,
}

/// Result of feature extraction at a point.
#[derive(Debug, Clone)]
pub struct Extraction {
    /// Always complete; missing values are schema defaults
    pub features: FeatureMap,
    /// Predictor asset that was sampled, or the earliest candidate if
    /// none could be read
    pub asset: Option<RasterAsset>,
    pub zone: Option<ZoneRef>,
    /// All predictor assets in the window, ascending by capture time
    pub predictor_assets: Vec<RasterAsset>,
    /// Degraded steps, e.g. an unreadable artifact
    pub warnings: Vec<String>,
}

/// Resolves rasters and zones for a point and assembles the feature map.
#[derive(Clone)]
pub struct FeatureExtractor {
    catalog: Arc<dyn SpatialCatalog>,
    storage: Arc<ObjectStorage>,
    schema: FeatureSchema,
    predictor_asset_type: String,
}

impl FeatureExtractor {
    pub fn new(
        catalog: Arc<dyn SpatialCatalog>,
        storage: Arc<ObjectStorage>,
        schema: FeatureSchema,
        predictor_asset_type: impl Into<String>,
    ) -> Self {
        Self {
            catalog,
            storage,
            schema,
            predictor_asset_type: predictor_asset_type.into(),
        }
    }

    pub fn schema(&self) -> FeatureSchema {
        self.schema
    }

    /// Build a complete feature map for `point`.
    ///
    /// Raster bands map positionally onto the schema; zone attributes fill
    /// keys the raster did not supply; defaults fill the rest. Predictor
    /// assets are tried earliest first until one samples; each failure is
    /// recorded as a warning. Catalog failures propagate.
    pub async fn extract(&self, point: GeoPoint, window: &DateRange) -> DssResult<Extraction> {
        point.validate()?;

        let predictor_assets: Vec<RasterAsset> = self
            .catalog
            .assets_intersecting(point, window)
            .await?
            .into_iter()
            .filter(|a| a.asset_type == self.predictor_asset_type)
            .collect();

        let mut builder = FeatureMap::builder(self.schema);
        let mut warnings = Vec::new();

        let mut candidates: Vec<&RasterAsset> = predictor_assets.iter().collect();
        candidates.sort_by_key(|a| a.captured_at);

        // First readable candidate wins; if none is, the earliest is reported.
        let mut asset = candidates.first().map(|a| (*a).clone());
        for candidate in &candidates {
            match self.sample_asset(candidate, point).await {
                Ok(sample) => {
                    let mut supplied = 0;
                    for (index, value) in sample.values.iter().enumerate() {
                        if let Some(v) = value {
                            if builder.supply_at(index, *v, FeatureSource::Raster) {
                                supplied += 1;
                            }
                        }
                    }
                    debug!(asset_id = %candidate.id, supplied, "Sampled predictor asset");
                    asset = Some((*candidate).clone());
                    break;
                }
                Err(e) => {
                    warn!(asset_id = %candidate.id, error = %e, "Predictor sampling failed, trying next asset");
                    warnings.push(e.to_string());
                }
            }
        }

        if candidates.is_empty() {
            debug!(
                lon = point.lon,
                lat = point.lat,
                asset_type = %self.predictor_asset_type,
                "No predictor asset intersects the point"
            );
            warnings.push(format!(
                "No {} asset intersects the point in the window",
                self.predictor_asset_type
            ));
        }

        let zone = self
            .catalog
            .zone_containing(point, ZoneYear::ExactOrLatest(window.end.year()))
            .await?
            .into_option();
        match &zone {
            Some(zone) => {
                let merged = builder.merge_zone(&zone.attributes);
                debug!(zone_code = %zone.zone_code, year = zone.year, merged, "Merged zone attributes");
            }
            None => warnings.push("No zone contains the point".to_string()),
        }

        let features = builder.build();
        let defaults = features.defaults_used();
        if !defaults.is_empty() {
            warn!(defaults = ?defaults, "Substituted default feature values");
        }

        Ok(Extraction {
            features,
            asset,
            zone: zone.as_ref().map(ZoneRef::from),
            predictor_assets,
            warnings,
        })
    }

    /// Windowed read of every band of `asset` at `point`.
    pub async fn sample_asset(&self, asset: &RasterAsset, point: GeoPoint) -> DssResult<PointSample> {
        let key = self
            .storage
            .key_for_url(&asset.url)
            .map_err(|e| DssError::Extraction(e.detail().to_string()))?;
        let store = self
            .storage
            .object_store()
            .map_err(|e| DssError::Extraction(e.detail().to_string()))?;

        let sample = PointSampler::new(store)
            .sample(&key, point)
            .await
            .map_err(|e| DssError::Extraction(format!("Failed to sample asset {}: {}", asset.id, e)))?;

        if sample.bands != asset.bands {
            return Err(DssError::Extraction(format!(
                "Asset {} declares bands {:?} but the artifact has {:?}",
                asset.id, asset.bands, sample.bands
            )));
        }
        Ok(sample)
    }

    /// Values of one schema feature across `assets`, ascending by date.
    ///
    /// Only the most recent `limit` assets are sampled; unreadable assets and
    /// nodata pixels are left out.
    pub async fn feature_series(
        &self,
        point: GeoPoint,
        assets: &[RasterAsset],
        feature: &str,
        limit: usize,
    ) -> Vec<SeriesPoint> {
        let Some(band) = self.schema.position(feature) else {
            return Vec::new();
        };

        let mut recent: Vec<&RasterAsset> = assets.iter().collect();
        recent.sort_by_key(|a| a.captured_at);
        let recent = &recent[recent.len().saturating_sub(limit)..];

        let samples = join_all(recent.iter().map(|a| self.sample_asset(a, point))).await;

        recent
            .iter()
            .zip(samples)
            .filter_map(|(asset, sample)| match sample {
                Ok(sample) => sample.values.get(band).copied().flatten().map(|value| SeriesPoint {
                    date: asset.captured_at,
                    value,
                    asset_id: asset.id,
                }),
                Err(e) => {
                    warn!(asset_id = %asset.id, error = %e, "Skipping time-series sample");
                    None
                }
            })
            .collect()
    }
}
