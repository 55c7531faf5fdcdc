//! Coordinate reference system transformations.
//!
//! EPSG-to-EPSG reprojection goes through `proj4rs` with PROJ strings from the
//! `crs-definitions` database. Metric distances around a query point use a
//! local azimuthal equidistant projection implemented here.

pub mod epsg;
pub mod local;

pub use epsg::{
    is_geographic_crs, proj_string, project_point, to_wgs84, CrsTransformer, ProjectionError,
    WGS84_EPSG,
};
pub use local::LocalProjection;
