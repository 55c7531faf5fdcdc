//! Common types and utilities shared across the crop decision-support crates.

pub mod bbox;
pub mod error;
pub mod lookup;
pub mod model;
pub mod point;
pub mod time;

pub use bbox::BoundingBox;
pub use error::{DssError, DssResult, ErrorCategory};
pub use lookup::Lookup;
pub use model::{
    validate_footprint, NewObservation, NewRasterAsset, Observation, ObservationSource,
    RasterAsset, Zone, ZoneAttributes, ZoneUpsert,
};
pub use point::GeoPoint;
pub use time::{parse_datetime, DateRange};
