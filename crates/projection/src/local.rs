//! Local azimuthal equidistant projection.
//!
//! Centered on a query point, distances from the center are preserved exactly
//! on the sphere, so radius searches behave the same at any latitude.

/// Mean Earth radius (meters), IUGG.
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Spherical azimuthal equidistant projection around a fixed center.
#[derive(Debug, Clone, Copy)]
pub struct LocalProjection {
    /// Center longitude in radians
    lon0: f64,
    /// Center latitude in radians
    lat0: f64,
    sin_lat0: f64,
    cos_lat0: f64,
}

impl LocalProjection {
    /// Create a projection centered at (lon, lat) in degrees.
    pub fn centered_at(lon_deg: f64, lat_deg: f64) -> Self {
        let lat0 = lat_deg.to_radians();
        Self {
            lon0: lon_deg.to_radians(),
            lat0,
            sin_lat0: lat0.sin(),
            cos_lat0: lat0.cos(),
        }
    }

    /// Project (lon, lat) degrees to planar (x, y) meters from the center.
    pub fn forward(&self, lon_deg: f64, lat_deg: f64) -> (f64, f64) {
        let lat = lat_deg.to_radians();
        let dlon = lon_deg.to_radians() - self.lon0;
        let (sin_lat, cos_lat) = lat.sin_cos();
        let cos_dlon = dlon.cos();

        let cos_c = (self.sin_lat0 * sin_lat + self.cos_lat0 * cos_lat * cos_dlon).clamp(-1.0, 1.0);
        let c = cos_c.acos();
        let k = if c.abs() < 1e-12 { 1.0 } else { c / c.sin() };

        let x = EARTH_RADIUS_M * k * cos_lat * dlon.sin();
        let y = EARTH_RADIUS_M * k * (self.cos_lat0 * sin_lat - self.sin_lat0 * cos_lat * cos_dlon);
        (x, y)
    }

    /// Great-circle distance in meters from the center to (lon, lat).
    pub fn distance_m(&self, lon_deg: f64, lat_deg: f64) -> f64 {
        let (x, y) = self.forward(lon_deg, lat_deg);
        x.hypot(y)
    }

    /// Center latitude in degrees.
    pub fn center_lat(&self) -> f64 {
        self.lat0.to_degrees()
    }

    /// Center longitude in degrees.
    pub fn center_lon(&self) -> f64 {
        self.lon0.to_degrees()
    }

    /// Lon/lat half-widths in degrees of the box enclosing a circle of
    /// `radius_m`. A longitude half-width of 180 means every longitude.
    ///
    /// Used as a prefilter before exact distance checks; pair it with
    /// [`LocalProjection::in_degree_window`], which wraps at the antimeridian.
    pub fn degree_window(&self, radius_m: f64) -> (f64, f64) {
        let angular = radius_m / EARTH_RADIUS_M;
        let dlat = angular.to_degrees() * WINDOW_MARGIN;
        let lat0 = self.center_lat();

        // The circle reaches a pole: every meridian crosses it.
        if lat0 + dlat >= 90.0 || lat0 - dlat <= -90.0 {
            return (180.0, dlat);
        }

        let ratio = angular.sin() / self.cos_lat0;
        let dlon = if ratio >= 1.0 {
            180.0
        } else {
            (ratio.asin().to_degrees() * WINDOW_MARGIN).min(180.0)
        };
        (dlon, dlat)
    }

    /// Whether (lon, lat) lies in the box from [`LocalProjection::degree_window`].
    pub fn in_degree_window(&self, window: (f64, f64), lon_deg: f64, lat_deg: f64) -> bool {
        let (dlon, dlat) = window;
        if (lat_deg - self.center_lat()).abs() > dlat {
            return false;
        }
        if dlon >= 180.0 {
            return true;
        }
        let delta = (lon_deg - self.center_lon()).rem_euclid(360.0);
        delta.min(360.0 - delta) <= dlon
    }
}

/// Relative slack so boundary points survive floating-point round-off.
const WINDOW_MARGIN: f64 = 1.0 + 1e-9;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_center_maps_to_origin() {
        let proj = LocalProjection::centered_at(36.8, -1.3);
        let (x, y) = proj.forward(36.8, -1.3);
        assert!(x.abs() < 1e-6 && y.abs() < 1e-6);
    }

    #[test]
    fn test_one_degree_of_latitude() {
        let proj = LocalProjection::centered_at(10.0, 45.0);
        let d = proj.distance_m(10.0, 46.0);
        assert!((d - 111_195.0).abs() < 10.0, "got {}", d);
    }

    #[test]
    fn test_longitude_shrinks_with_latitude() {
        let equator = LocalProjection::centered_at(0.0, 0.0).distance_m(1.0, 0.0);
        let high = LocalProjection::centered_at(0.0, 60.0).distance_m(1.0, 60.0);
        assert!((high / equator - 0.5).abs() < 0.01);
    }

    #[test]
    fn test_axis_orientation() {
        let proj = LocalProjection::centered_at(0.0, 0.0);
        let (x, y) = proj.forward(0.5, 0.25);
        assert!(x > 0.0 && y > 0.0);
    }

    #[test]
    fn test_degree_window_matches_circle_width() {
        let proj = LocalProjection::centered_at(10.0, 60.0);
        let (dlon, dlat) = proj.degree_window(50_000.0);
        assert!((dlat - 0.4497).abs() < 1e-3, "got {}", dlat);
        // A point at the window edge on the center parallel is inside the radius.
        assert!(proj.distance_m(10.0 + dlon * 0.999, 60.0) <= 50_000.0);
        assert!(dlon > dlat);
    }

    #[test]
    fn test_degree_window_covering_pole_spans_all_longitudes() {
        let proj = LocalProjection::centered_at(0.0, 89.0);
        let window = proj.degree_window(200_000.0);
        assert_eq!(window.0, 180.0);
        assert!(proj.in_degree_window(window, 180.0, 89.5));
        assert!(!proj.in_degree_window(window, 180.0, 85.0));
    }

    #[test]
    fn test_degree_window_wraps_antimeridian() {
        let proj = LocalProjection::centered_at(179.995, 0.0);
        let window = proj.degree_window(5_000.0);
        assert!(proj.in_degree_window(window, -179.995, 0.0));
        assert!(!proj.in_degree_window(window, -179.9, 0.0));
    }
}
