//! Zarr V3 pyramid writer.

mod pyramid;

pub use pyramid::{PyramidWriteResult, PyramidWriter};
