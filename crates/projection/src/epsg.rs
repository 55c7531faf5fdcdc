//! EPSG reprojection via proj4rs.

use proj4rs::proj::Proj;
use proj4rs::transform::transform;
use thiserror::Error;

/// EPSG code of WGS84 geographic coordinates.
pub const WGS84_EPSG: u32 = 4326;

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("EPSG:{0} is not in the crs-definitions database")]
    UnknownEpsg(u32),

    #[error("Invalid projection EPSG:{epsg}: {message}")]
    InvalidProjection { epsg: u32, message: String },

    #[error("Transform from EPSG:{src} to EPSG:{dst} failed: {message}")]
    TransformFailed { src: u32, dst: u32, message: String },
}

/// PROJ string for an EPSG code.
pub fn proj_string(epsg: u32) -> Option<&'static str> {
    u16::try_from(epsg)
        .ok()
        .and_then(crs_definitions::from_code)
        .map(|def| def.proj4)
}

/// True for lon/lat coordinate systems.
pub fn is_geographic_crs(epsg: u32) -> bool {
    match proj_string(epsg) {
        Some(s) => s.contains("+proj=longlat"),
        None => epsg == WGS84_EPSG,
    }
}

fn load(epsg: u32) -> Result<Proj, ProjectionError> {
    let def = proj_string(epsg).ok_or(ProjectionError::UnknownEpsg(epsg))?;
    Proj::from_proj_string(def).map_err(|e| ProjectionError::InvalidProjection {
        epsg,
        message: format!("{:?}", e),
    })
}

/// Reusable transformer between two EPSG codes.
///
/// Geographic coordinates are degrees on both sides of the API; proj4rs works
/// in radians internally.
pub struct CrsTransformer {
    src_epsg: u32,
    dst_epsg: u32,
    src: Option<Proj>,
    dst: Option<Proj>,
    src_geographic: bool,
    dst_geographic: bool,
}

impl CrsTransformer {
    pub fn new(src_epsg: u32, dst_epsg: u32) -> Result<Self, ProjectionError> {
        // Same CRS is a pass-through; no need to resolve definitions.
        let (src, dst) = if src_epsg == dst_epsg {
            (None, None)
        } else {
            (Some(load(src_epsg)?), Some(load(dst_epsg)?))
        };

        Ok(Self {
            src_epsg,
            dst_epsg,
            src,
            dst,
            src_geographic: is_geographic_crs(src_epsg),
            dst_geographic: is_geographic_crs(dst_epsg),
        })
    }

    pub fn source_epsg(&self) -> u32 {
        self.src_epsg
    }

    pub fn target_epsg(&self) -> u32 {
        self.dst_epsg
    }

    pub fn transform(&self, x: f64, y: f64) -> Result<(f64, f64), ProjectionError> {
        let (src, dst) = match (&self.src, &self.dst) {
            (Some(src), Some(dst)) => (src, dst),
            _ => return Ok((x, y)),
        };

        let mut point = if self.src_geographic {
            (x.to_radians(), y.to_radians(), 0.0)
        } else {
            (x, y, 0.0)
        };

        transform(src, dst, &mut point).map_err(|e| ProjectionError::TransformFailed {
            src: self.src_epsg,
            dst: self.dst_epsg,
            message: format!("{:?}", e),
        })?;

        let out = if self.dst_geographic {
            (point.0.to_degrees(), point.1.to_degrees())
        } else {
            (point.0, point.1)
        };

        if !out.0.is_finite() || !out.1.is_finite() {
            return Err(ProjectionError::TransformFailed {
                src: self.src_epsg,
                dst: self.dst_epsg,
                message: format!("non-finite result for ({}, {})", x, y),
            });
        }
        Ok(out)
    }
}

/// Project a single point between two EPSG codes.
pub fn project_point(src_epsg: u32, dst_epsg: u32, x: f64, y: f64) -> Result<(f64, f64), ProjectionError> {
    CrsTransformer::new(src_epsg, dst_epsg)?.transform(x, y)
}

/// Project a point from any supported EPSG code to WGS84 lon/lat.
pub fn to_wgs84(src_epsg: u32, x: f64, y: f64) -> Result<(f64, f64), ProjectionError> {
    project_point(src_epsg, WGS84_EPSG, x, y)
}
