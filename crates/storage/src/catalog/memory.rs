//! In-process spatial catalog.
//!
//! Same query semantics as the PostGIS catalog, evaluated with `geo`
//! predicates. Used by tests and single-node deployments without a database.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use geo::{Contains, Intersects, Point};
use tokio::sync::RwLock;
use uuid::Uuid;

use dss_common::{
    BoundingBox, DateRange, DssResult, GeoPoint, Lookup, NewObservation, NewRasterAsset,
    Observation, RasterAsset, Zone, ZoneUpsert,
};
use projection::LocalProjection;

use super::{validate_radius, SpatialCatalog, ZoneYear};

#[derive(Default)]
struct CatalogState {
    assets: Vec<RasterAsset>,
    /// Keyed by (zone_code, year); the key is the uniqueness constraint
    zones: BTreeMap<(String, i32), Zone>,
    observations: Vec<Observation>,
}

/// Spatial catalog held in memory behind a read-write lock.
#[derive(Default)]
pub struct MemoryCatalog {
    state: RwLock<CatalogState>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn asset_count(&self) -> usize {
        self.state.read().await.assets.len()
    }

    pub async fn zone_count(&self) -> usize {
        self.state.read().await.zones.len()
    }

    pub async fn observation_count(&self) -> usize {
        self.state.read().await.observations.len()
    }
}

fn sort_assets(assets: &mut [RasterAsset]) {
    assets.sort_by(|a, b| {
        a.captured_at
            .cmp(&b.captured_at)
            .then(a.created_at.cmp(&b.created_at))
            .then(a.id.cmp(&b.id))
    });
}

fn containing_zone(state: &CatalogState, point: Point<f64>, year: Option<i32>) -> Option<Zone> {
    // BTreeMap iteration is ordered by zone_code, so ties resolve by code.
    state
        .zones
        .values()
        .filter(|z| year.map_or(true, |y| z.year == y))
        .filter(|z| z.geometry.as_ref().is_some_and(|g| g.contains(&point)))
        .fold(None::<&Zone>, |best, z| match best {
            Some(b) if b.year >= z.year => Some(b),
            _ => Some(z),
        })
        .cloned()
}

#[async_trait]
impl SpatialCatalog for MemoryCatalog {
    async fn register_asset(&self, asset: NewRasterAsset) -> DssResult<RasterAsset> {
        asset.validate()?;
        let asset = asset.into_asset(Uuid::new_v4(), Utc::now());

        let mut state = self.state.write().await;
        state.assets.push(asset.clone());
        Ok(asset)
    }

    async fn get_asset(&self, id: Uuid) -> DssResult<Lookup<RasterAsset>> {
        let state = self.state.read().await;
        Ok(state.assets.iter().find(|a| a.id == id).cloned().into())
    }

    async fn list_assets(&self, asset_type: Option<&str>) -> DssResult<Vec<RasterAsset>> {
        let state = self.state.read().await;
        let mut assets: Vec<RasterAsset> = state
            .assets
            .iter()
            .filter(|a| asset_type.map_or(true, |t| a.asset_type == t))
            .cloned()
            .collect();
        sort_assets(&mut assets);
        Ok(assets)
    }

    async fn assets_intersecting(
        &self,
        point: GeoPoint,
        window: &DateRange,
    ) -> DssResult<Vec<RasterAsset>> {
        point.validate()?;
        let p: Point<f64> = point.into();

        let state = self.state.read().await;
        let mut assets: Vec<RasterAsset> = state
            .assets
            .iter()
            .filter(|a| window.contains(&a.captured_at))
            .filter(|a| {
                BoundingBox::of_polygon(&a.footprint)
                    .is_some_and(|bbox| bbox.contains_point(point.lon, point.lat))
            })
            .filter(|a| a.footprint.intersects(&p))
            .cloned()
            .collect();
        sort_assets(&mut assets);
        Ok(assets)
    }

    async fn upsert_zone(&self, zone: ZoneUpsert) -> DssResult<Zone> {
        zone.validate()?;
        let key = (zone.zone_code.clone(), zone.year);

        let mut state = self.state.write().await;
        let stored = state.zones.entry(key).or_insert_with(|| Zone {
            id: Uuid::new_v4(),
            zone_code: zone.zone_code.clone(),
            name: None,
            parent_region: None,
            year: zone.year,
            geometry: None,
            attributes: Default::default(),
            updated_at: Utc::now(),
        });

        if zone.name.is_some() {
            stored.name = zone.name;
        }
        if zone.parent_region.is_some() {
            stored.parent_region = zone.parent_region;
        }
        if zone.geometry.is_some() {
            stored.geometry = zone.geometry;
        }
        stored.attributes.merge_from(&zone.attributes);
        stored.updated_at = Utc::now();

        Ok(stored.clone())
    }

    async fn zone_by_code(&self, zone_code: &str, year: i32) -> DssResult<Lookup<Zone>> {
        let state = self.state.read().await;
        Ok(state
            .zones
            .get(&(zone_code.to_string(), year))
            .cloned()
            .into())
    }

    async fn zone_containing(&self, point: GeoPoint, year: ZoneYear) -> DssResult<Lookup<Zone>> {
        point.validate()?;
        let p: Point<f64> = point.into();

        let state = self.state.read().await;
        let found = match year {
            ZoneYear::Any => containing_zone(&state, p, None),
            ZoneYear::Exact(y) => containing_zone(&state, p, Some(y)),
            ZoneYear::ExactOrLatest(y) => {
                containing_zone(&state, p, Some(y)).or_else(|| containing_zone(&state, p, None))
            }
        };
        Ok(found.into())
    }

    async fn list_zones(&self, year: Option<i32>) -> DssResult<Vec<Zone>> {
        let state = self.state.read().await;
        Ok(state
            .zones
            .values()
            .filter(|z| year.map_or(true, |y| z.year == y))
            .cloned()
            .collect())
    }

    async fn record_observation(&self, observation: NewObservation) -> DssResult<Observation> {
        observation.validate()?;
        let observation = observation.into_observation(Uuid::new_v4(), Utc::now());

        let mut state = self.state.write().await;
        state.observations.push(observation.clone());
        Ok(observation)
    }

    async fn observations_near(
        &self,
        point: GeoPoint,
        radius_m: f64,
    ) -> DssResult<Vec<Observation>> {
        point.validate()?;
        validate_radius(radius_m)?;

        let local = LocalProjection::centered_at(point.lon, point.lat);
        let window = local.degree_window(radius_m);

        let state = self.state.read().await;
        let mut hits: Vec<(f64, Observation)> = state
            .observations
            .iter()
            .filter(|o| local.in_degree_window(window, o.location.lon, o.location.lat))
            .filter_map(|o| {
                let d = local.distance_m(o.location.lon, o.location.lat);
                (d <= radius_m).then(|| (d, o.clone()))
            })
            .collect();

        hits.sort_by(|a, b| {
            a.0.total_cmp(&b.0)
                .then(a.1.recorded_at.cmp(&b.1.recorded_at))
        });
        Ok(hits.into_iter().map(|(_, o)| o).collect())
    }
}
