//! Mapping of lower-level failures onto the shared error taxonomy.

use dss_common::DssError;
use raster_processor::RasterError;

/// Any failure while decoding, converting or re-reading a raster is a
/// conversion failure for the ingestion as a whole.
pub fn conversion_error(err: RasterError) -> DssError {
    DssError::Conversion(err.to_string())
}

/// Failures of the local scratch area.
pub fn scratch_error(context: &str, err: std::io::Error) -> DssError {
    DssError::Storage(format!("{}: {}", context, err))
}
