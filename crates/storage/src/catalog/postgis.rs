//! Spatial catalog backed by PostgreSQL + PostGIS.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use tracing::{debug, info};
use uuid::Uuid;

use dss_common::{
    DateRange, DssError, DssResult, GeoPoint, Lookup, NewObservation, NewRasterAsset, Observation,
    ObservationSource, RasterAsset, Zone, ZoneAttributes, ZoneUpsert,
};

use super::geometry::{
    multipolygon_from_geojson, multipolygon_to_geojson, polygon_from_geojson, polygon_to_geojson,
};
use super::{validate_radius, CatalogConfig, SpatialCatalog, ZoneYear};

const ASSET_COLUMNS: &str = "id, url, captured_at, asset_type, crop_id, \
     ST_AsGeoJSON(footprint) AS footprint, bands, created_at";

const ZONE_COLUMNS: &str = "id, zone_code, name, parent_region, year, \
     ST_AsGeoJSON(geom) AS geom, ndvi_mean, precip_mean, et_mean, temp_mean, \
     elevation, soil_texture, updated_at";

const OBSERVATION_COLUMNS: &str = "id, crop_id, year, yield_value, \
     ST_X(geom) AS lon, ST_Y(geom) AS lat, features::text AS features, source, recorded_at";

/// Database connection pool and catalog operations.
pub struct PostgisCatalog {
    pool: PgPool,
}

impl PostgisCatalog {
    /// Create a new catalog connection.
    pub async fn connect(config: &CatalogConfig) -> DssResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.database_url)
            .await
            .map_err(|e| DssError::Catalog(format!("Connection failed: {}", e)))?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Bootstrap tables and indexes. Idempotent; never alters existing tables.
    pub async fn migrate(&self) -> DssResult<()> {
        for statement in SCHEMA_SQL.split(';') {
            let trimmed = statement.trim();
            if !trimmed.is_empty() {
                sqlx::query(trimmed)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| DssError::Catalog(format!("Migration failed: {}", e)))?;
            }
        }

        info!("Catalog schema ready");
        Ok(())
    }

    async fn zone_for_year(&self, point: GeoPoint, year: Option<i32>) -> DssResult<Lookup<Zone>> {
        let sql = format!(
            "SELECT {} FROM zones \
             WHERE geom IS NOT NULL \
             AND ST_Contains(geom, ST_SetSRID(ST_MakePoint($1, $2), 4326)) \
             AND ($3::INTEGER IS NULL OR year = $3) \
             ORDER BY year DESC, zone_code ASC LIMIT 1",
            ZONE_COLUMNS
        );

        let row = sqlx::query_as::<_, ZoneRow>(&sql)
            .bind(point.lon)
            .bind(point.lat)
            .bind(year)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_failed)?;

        row.map(Zone::try_from).transpose().map(Lookup::from)
    }
}

fn query_failed(e: sqlx::Error) -> DssError {
    DssError::Catalog(format!("Query failed: {}", e))
}

#[async_trait]
impl SpatialCatalog for PostgisCatalog {
    async fn register_asset(&self, asset: NewRasterAsset) -> DssResult<RasterAsset> {
        asset.validate()?;
        let id = Uuid::new_v4();
        let footprint = polygon_to_geojson(&asset.footprint)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DssError::Catalog(format!("Transaction failed: {}", e)))?;

        let created_at: DateTime<Utc> = sqlx::query_scalar(
            r#"
            INSERT INTO raster_assets (
                id, url, captured_at, asset_type, crop_id, footprint, bands, created_at
            ) VALUES (
                $1, $2, $3, $4, $5,
                ST_SetSRID(ST_GeomFromGeoJSON($6), 4326),
                $7, NOW()
            )
            RETURNING created_at
            "#,
        )
        .bind(id)
        .bind(&asset.url)
        .bind(asset.captured_at)
        .bind(&asset.asset_type)
        .bind(&asset.crop_id)
        .bind(&footprint)
        .bind(&asset.bands)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| DssError::Catalog(format!("Insert failed: {}", e)))?;

        tx.commit()
            .await
            .map_err(|e| DssError::Catalog(format!("Commit failed: {}", e)))?;

        debug!(asset_id = %id, url = %asset.url, "Registered raster asset");
        Ok(asset.into_asset(id, created_at))
    }

    async fn get_asset(&self, id: Uuid) -> DssResult<Lookup<RasterAsset>> {
        let sql = format!("SELECT {} FROM raster_assets WHERE id = $1", ASSET_COLUMNS);
        let row = sqlx::query_as::<_, AssetRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_failed)?;

        row.map(RasterAsset::try_from).transpose().map(Lookup::from)
    }

    async fn list_assets(&self, asset_type: Option<&str>) -> DssResult<Vec<RasterAsset>> {
        let sql = format!(
            "SELECT {} FROM raster_assets \
             WHERE ($1::TEXT IS NULL OR asset_type = $1) \
             ORDER BY captured_at ASC, created_at ASC, id ASC",
            ASSET_COLUMNS
        );
        let rows = sqlx::query_as::<_, AssetRow>(&sql)
            .bind(asset_type)
            .fetch_all(&self.pool)
            .await
            .map_err(query_failed)?;

        rows.into_iter().map(RasterAsset::try_from).collect()
    }

    async fn assets_intersecting(
        &self,
        point: GeoPoint,
        window: &DateRange,
    ) -> DssResult<Vec<RasterAsset>> {
        point.validate()?;
        let sql = format!(
            "SELECT {} FROM raster_assets \
             WHERE footprint && ST_SetSRID(ST_MakePoint($1, $2), 4326) \
             AND ST_Intersects(footprint, ST_SetSRID(ST_MakePoint($1, $2), 4326)) \
             AND captured_at >= $3 AND captured_at <= $4 \
             ORDER BY captured_at ASC, created_at ASC, id ASC",
            ASSET_COLUMNS
        );
        let rows = sqlx::query_as::<_, AssetRow>(&sql)
            .bind(point.lon)
            .bind(point.lat)
            .bind(window.start)
            .bind(window.end)
            .fetch_all(&self.pool)
            .await
            .map_err(query_failed)?;

        rows.into_iter().map(RasterAsset::try_from).collect()
    }

    async fn upsert_zone(&self, zone: ZoneUpsert) -> DssResult<Zone> {
        zone.validate()?;
        let geometry = zone
            .geometry
            .as_ref()
            .map(multipolygon_to_geojson)
            .transpose()?;
        let attrs = &zone.attributes;

        // Absent incoming values keep what is stored.
        let sql = format!(
            r#"
            INSERT INTO zones (
                id, zone_code, year, name, parent_region, geom,
                ndvi_mean, precip_mean, et_mean, temp_mean, elevation, soil_texture,
                updated_at
            ) VALUES (
                $1, $2, $3, $4, $5,
                ST_Multi(ST_SetSRID(ST_GeomFromGeoJSON($6), 4326)),
                $7, $8, $9, $10, $11, $12,
                NOW()
            )
            ON CONFLICT (zone_code, year)
            DO UPDATE SET
                name = COALESCE(EXCLUDED.name, zones.name),
                parent_region = COALESCE(EXCLUDED.parent_region, zones.parent_region),
                geom = COALESCE(EXCLUDED.geom, zones.geom),
                ndvi_mean = COALESCE(EXCLUDED.ndvi_mean, zones.ndvi_mean),
                precip_mean = COALESCE(EXCLUDED.precip_mean, zones.precip_mean),
                et_mean = COALESCE(EXCLUDED.et_mean, zones.et_mean),
                temp_mean = COALESCE(EXCLUDED.temp_mean, zones.temp_mean),
                elevation = COALESCE(EXCLUDED.elevation, zones.elevation),
                soil_texture = COALESCE(EXCLUDED.soil_texture, zones.soil_texture),
                updated_at = NOW()
            RETURNING {}
            "#,
            ZONE_COLUMNS
        );

        let row = sqlx::query_as::<_, ZoneRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(&zone.zone_code)
            .bind(zone.year)
            .bind(&zone.name)
            .bind(&zone.parent_region)
            .bind(geometry)
            .bind(attrs.vegetation_index_mean)
            .bind(attrs.precipitation_mean)
            .bind(attrs.evapotranspiration_mean)
            .bind(attrs.temperature_mean)
            .bind(attrs.elevation)
            .bind(attrs.soil_texture_index)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| DssError::Catalog(format!("Upsert failed: {}", e)))?;

        Zone::try_from(row)
    }

    async fn zone_by_code(&self, zone_code: &str, year: i32) -> DssResult<Lookup<Zone>> {
        let sql = format!(
            "SELECT {} FROM zones WHERE zone_code = $1 AND year = $2",
            ZONE_COLUMNS
        );
        let row = sqlx::query_as::<_, ZoneRow>(&sql)
            .bind(zone_code)
            .bind(year)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_failed)?;

        row.map(Zone::try_from).transpose().map(Lookup::from)
    }

    async fn zone_containing(&self, point: GeoPoint, year: ZoneYear) -> DssResult<Lookup<Zone>> {
        point.validate()?;
        match year {
            ZoneYear::Any => self.zone_for_year(point, None).await,
            ZoneYear::Exact(y) => self.zone_for_year(point, Some(y)).await,
            ZoneYear::ExactOrLatest(y) => match self.zone_for_year(point, Some(y)).await? {
                Lookup::Found(zone) => Ok(Lookup::Found(zone)),
                Lookup::NotFound => self.zone_for_year(point, None).await,
            },
        }
    }

    async fn list_zones(&self, year: Option<i32>) -> DssResult<Vec<Zone>> {
        let sql = format!(
            "SELECT {} FROM zones WHERE ($1::INTEGER IS NULL OR year = $1) \
             ORDER BY zone_code ASC, year ASC",
            ZONE_COLUMNS
        );
        let rows = sqlx::query_as::<_, ZoneRow>(&sql)
            .bind(year)
            .fetch_all(&self.pool)
            .await
            .map_err(query_failed)?;

        rows.into_iter().map(Zone::try_from).collect()
    }

    async fn record_observation(&self, observation: NewObservation) -> DssResult<Observation> {
        observation.validate()?;
        let id = Uuid::new_v4();
        let features = observation.features.as_ref().map(|f| f.to_string());

        let recorded_at: DateTime<Utc> = sqlx::query_scalar(
            r#"
            INSERT INTO observations (
                id, crop_id, year, yield_value, geom, features, source, recorded_at
            ) VALUES (
                $1, $2, $3, $4,
                ST_SetSRID(ST_MakePoint($5, $6), 4326),
                $7::JSONB, $8, NOW()
            )
            RETURNING recorded_at
            "#,
        )
        .bind(id)
        .bind(&observation.crop_id)
        .bind(observation.year)
        .bind(observation.yield_value)
        .bind(observation.location.lon)
        .bind(observation.location.lat)
        .bind(features)
        .bind(observation.source.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| DssError::Catalog(format!("Insert failed: {}", e)))?;

        Ok(observation.into_observation(id, recorded_at))
    }

    async fn observations_near(
        &self,
        point: GeoPoint,
        radius_m: f64,
    ) -> DssResult<Vec<Observation>> {
        point.validate()?;
        validate_radius(radius_m)?;

        // Geography casts measure in meters on the spheroid.
        let sql = format!(
            "SELECT {} FROM observations \
             WHERE ST_DWithin(geom::geography, ST_SetSRID(ST_MakePoint($1, $2), 4326)::geography, $3) \
             ORDER BY ST_Distance(geom::geography, ST_SetSRID(ST_MakePoint($1, $2), 4326)::geography) ASC, \
             recorded_at ASC",
            OBSERVATION_COLUMNS
        );
        let rows = sqlx::query_as::<_, ObservationRow>(&sql)
            .bind(point.lon)
            .bind(point.lat)
            .bind(radius_m)
            .fetch_all(&self.pool)
            .await
            .map_err(query_failed)?;

        rows.into_iter().map(Observation::try_from).collect()
    }
}

#[derive(FromRow)]
struct AssetRow {
    id: Uuid,
    url: String,
    captured_at: DateTime<Utc>,
    asset_type: String,
    crop_id: Option<String>,
    footprint: String,
    bands: Vec<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<AssetRow> for RasterAsset {
    type Error = DssError;

    fn try_from(row: AssetRow) -> DssResult<Self> {
        let footprint = polygon_from_geojson(&row.footprint)
            .map_err(|e| DssError::Catalog(format!("Asset {} footprint: {}", row.id, e)))?;

        Ok(RasterAsset {
            id: row.id,
            url: row.url,
            captured_at: row.captured_at,
            asset_type: row.asset_type,
            crop_id: row.crop_id,
            footprint,
            bands: row.bands,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct ZoneRow {
    id: Uuid,
    zone_code: String,
    name: Option<String>,
    parent_region: Option<String>,
    year: i32,
    geom: Option<String>,
    ndvi_mean: Option<f64>,
    precip_mean: Option<f64>,
    et_mean: Option<f64>,
    temp_mean: Option<f64>,
    elevation: Option<f64>,
    soil_texture: Option<f64>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ZoneRow> for Zone {
    type Error = DssError;

    fn try_from(row: ZoneRow) -> DssResult<Self> {
        let geometry = row
            .geom
            .as_deref()
            .map(multipolygon_from_geojson)
            .transpose()
            .map_err(|e| DssError::Catalog(format!("Zone {} geometry: {}", row.zone_code, e)))?;

        Ok(Zone {
            id: row.id,
            zone_code: row.zone_code,
            name: row.name,
            parent_region: row.parent_region,
            year: row.year,
            geometry,
            attributes: ZoneAttributes {
                vegetation_index_mean: row.ndvi_mean,
                precipitation_mean: row.precip_mean,
                evapotranspiration_mean: row.et_mean,
                temperature_mean: row.temp_mean,
                elevation: row.elevation,
                soil_texture_index: row.soil_texture,
            },
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct ObservationRow {
    id: Uuid,
    crop_id: String,
    year: i32,
    yield_value: f64,
    lon: f64,
    lat: f64,
    features: Option<String>,
    source: String,
    recorded_at: DateTime<Utc>,
}

impl TryFrom<ObservationRow> for Observation {
    type Error = DssError;

    fn try_from(row: ObservationRow) -> DssResult<Self> {
        let features = row
            .features
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| DssError::Catalog(format!("Observation {} features: {}", row.id, e)))?;
        let source = ObservationSource::parse(&row.source).ok_or_else(|| {
            DssError::Catalog(format!(
                "Observation {} has unknown source '{}'",
                row.id, row.source
            ))
        })?;

        Ok(Observation {
            id: row.id,
            crop_id: row.crop_id,
            year: row.year,
            yield_value: row.yield_value,
            location: GeoPoint::new(row.lon, row.lat),
            features,
            source,
            recorded_at: row.recorded_at,
        })
    }
}

/// Database schema SQL.
const SCHEMA_SQL: &str = r#"
CREATE EXTENSION IF NOT EXISTS postgis;

CREATE TABLE IF NOT EXISTS raster_assets (
    id UUID PRIMARY KEY,
    url TEXT NOT NULL,
    captured_at TIMESTAMPTZ NOT NULL,
    asset_type VARCHAR(100) NOT NULL,
    crop_id VARCHAR(100),
    footprint geometry(Polygon, 4326) NOT NULL,
    bands TEXT[] NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_raster_assets_footprint ON raster_assets USING GIST (footprint);
CREATE INDEX IF NOT EXISTS idx_raster_assets_captured_at ON raster_assets(captured_at);
CREATE INDEX IF NOT EXISTS idx_raster_assets_type ON raster_assets(asset_type);

CREATE TABLE IF NOT EXISTS zones (
    id UUID PRIMARY KEY,
    zone_code VARCHAR(64) NOT NULL,
    name TEXT,
    parent_region TEXT,
    year INTEGER NOT NULL,
    geom geometry(MultiPolygon, 4326),
    ndvi_mean DOUBLE PRECISION,
    precip_mean DOUBLE PRECISION,
    et_mean DOUBLE PRECISION,
    temp_mean DOUBLE PRECISION,
    elevation DOUBLE PRECISION,
    soil_texture DOUBLE PRECISION,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),

    UNIQUE(zone_code, year)
);

CREATE INDEX IF NOT EXISTS idx_zones_geom ON zones USING GIST (geom);

CREATE TABLE IF NOT EXISTS observations (
    id UUID PRIMARY KEY,
    crop_id VARCHAR(100) NOT NULL,
    year INTEGER NOT NULL,
    yield_value DOUBLE PRECISION NOT NULL,
    geom geometry(Point, 4326) NOT NULL,
    features JSONB,
    source VARCHAR(20) NOT NULL,
    recorded_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_observations_geom ON observations USING GIST (geom);
CREATE INDEX IF NOT EXISTS idx_observations_crop_year ON observations(crop_id, year)
"#;
