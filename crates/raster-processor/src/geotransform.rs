//! Affine pixel-to-world transform.

use serde::{Deserialize, Serialize};

use crate::error::{RasterError, Result};

/// Affine transform in GDAL coefficient order.
///
/// `x = c[0] + col * c[1] + row * c[2]`, `y = c[3] + col * c[4] + row * c[5]`,
/// where (col, row) address pixel corners.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform(pub [f64; 6]);

impl GeoTransform {
    /// North-up transform from the top-left corner and pixel size.
    pub fn north_up(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self([origin_x, pixel_width, 0.0, origin_y, 0.0, -pixel_height.abs()])
    }

    pub fn validate(&self) -> Result<()> {
        if self.0.iter().any(|v| !v.is_finite()) {
            return Err(RasterError::Georeference(
                "geotransform contains non-finite coefficients".to_string(),
            ));
        }
        if self.determinant().abs() < f64::EPSILON * 1e-6 {
            return Err(RasterError::Georeference(
                "geotransform is singular (zero pixel size)".to_string(),
            ));
        }
        Ok(())
    }

    fn determinant(&self) -> f64 {
        let c = &self.0;
        c[1] * c[5] - c[2] * c[4]
    }

    /// World coordinates of a pixel-corner position.
    pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        let c = &self.0;
        (c[0] + col * c[1] + row * c[2], c[3] + col * c[4] + row * c[5])
    }

    /// Fractional (col, row) of a world coordinate.
    pub fn invert(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        let c = &self.0;
        let det = self.determinant();
        if det == 0.0 {
            return Err(RasterError::Georeference(
                "geotransform is not invertible".to_string(),
            ));
        }
        let dx = x - c[0];
        let dy = y - c[3];
        let col = (c[5] * dx - c[2] * dy) / det;
        let row = (c[1] * dy - c[4] * dx) / det;
        Ok((col, row))
    }

    /// Transform for a level decimated by `factor`.
    pub fn scaled(&self, factor: u32) -> Self {
        let f = factor as f64;
        let c = &self.0;
        Self([c[0], c[1] * f, c[2] * f, c[3], c[4] * f, c[5] * f])
    }
}
