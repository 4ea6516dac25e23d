//! Spherical-earth geodesy helpers.
//!
//! Everything here uses a spherical earth with mean radius 6371 km. That is
//! the model every map client shares, so zone polygons line up exactly
//! across platforms.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Mean earth radius in kilometers
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Degrees to radians conversion factor
const DTOR: f64 = PI / 180.0;

/// Radians to degrees conversion factor
const RTOD: f64 = 180.0 / PI;

/// A WGS84 position in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Returns true if both components are finite numbers.
    pub fn is_finite(&self) -> bool {
        self.lat.is_finite() && self.lon.is_finite()
    }
}

impl From<GeoPoint> for geo::Coord<f64> {
    fn from(p: GeoPoint) -> Self {
        geo::Coord { x: p.lon, y: p.lat }
    }
}

impl From<geo::Coord<f64>> for GeoPoint {
    fn from(c: geo::Coord<f64>) -> Self {
        GeoPoint::new(c.y, c.x)
    }
}

/// Axis-aligned lat/lon box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoBounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

/// Continental Ukraine plus margin. Anything outside is a geocoding error.
pub const UKRAINE_BOUNDS: GeoBounds = GeoBounds {
    min_lat: 43.0,
    max_lat: 53.5,
    min_lon: 21.0,
    max_lon: 41.0,
};

impl GeoBounds {
    /// Inclusive containment test.
    pub fn contains(&self, p: GeoPoint) -> bool {
        p.lat >= self.min_lat && p.lat <= self.max_lat && p.lon >= self.min_lon && p.lon <= self.max_lon
    }
}

impl Default for GeoBounds {
    fn default() -> Self {
        UKRAINE_BOUNDS
    }
}

/// Wraps a longitude into [-180, 180).
#[inline]
pub fn normalize_lon(lon: f64) -> f64 {
    (lon + 540.0).rem_euclid(360.0) - 180.0
}

/// Solves the direct geodesic problem on a sphere.
///
/// # Arguments
/// * `origin` - Start point
/// * `bearing_deg` - Initial bearing, degrees clockwise from north
/// * `distance_km` - Distance along the great circle
pub fn destination_point(origin: GeoPoint, bearing_deg: f64, distance_km: f64) -> GeoPoint {
    let ang = distance_km / EARTH_RADIUS_KM;
    let lat1 = origin.lat * DTOR;
    let lon1 = origin.lon * DTOR;
    let brg = bearing_deg * DTOR;

    let (sin_lat1, cos_lat1) = lat1.sin_cos();
    let (sin_ang, cos_ang) = ang.sin_cos();

    let lat2 = (sin_lat1 * cos_ang + cos_lat1 * sin_ang * brg.cos()).asin();
    let lon2 = lon1 + (brg.sin() * sin_ang * cos_lat1).atan2(cos_ang - sin_lat1 * lat2.sin());

    GeoPoint::new(lat2 * RTOD, normalize_lon(lon2 * RTOD))
}

/// Great-circle distance in kilometers (haversine).
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let dlat = (b.lat - a.lat) * DTOR;
    let dlon = (b.lon - a.lon) * DTOR;
    let h = (dlat / 2.0).sin().powi(2) + (a.lat * DTOR).cos() * (b.lat * DTOR).cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

/// Appends the first point if the ring is not already closed.
///
/// Fill-rule renderers need explicit closure; rings with fewer than
/// two points are left alone.
pub fn close_ring(points: &mut Vec<GeoPoint>) {
    if points.len() < 2 {
        return;
    }
    let first = points[0];
    if points.last() != Some(&first) {
        points.push(first);
    }
}

/// Returns true if the ring is explicitly closed.
pub fn is_closed(points: &[GeoPoint]) -> bool {
    points.len() >= 2 && points.first() == points.last()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_destination_north() {
        // 1 degree of latitude on a 6371 km sphere
        let one_deg_km = EARTH_RADIUS_KM * DTOR;
        let p = destination_point(GeoPoint::new(50.0, 30.0), 0.0, one_deg_km);
        assert_relative_eq!(p.lat, 51.0, epsilon = 1e-9);
        assert_relative_eq!(p.lon, 30.0, epsilon = 1e-9);
    }

    #[test]
    fn test_destination_distance_roundtrip() {
        let center = GeoPoint::new(50.45, 30.52);
        for bearing in [0.0, 45.0, 137.0, 270.0, 359.0] {
            let p = destination_point(center, bearing, 120.0);
            assert_relative_eq!(haversine_km(center, p), 120.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_normalize_lon() {
        assert_relative_eq!(normalize_lon(181.0), -179.0);
        assert_relative_eq!(normalize_lon(-181.0), 179.0);
        assert_relative_eq!(normalize_lon(30.5), 30.5);
        assert_relative_eq!(normalize_lon(180.0), -180.0);
    }

    #[test]
    fn test_close_ring() {
        let mut ring = vec![GeoPoint::new(0.0, 0.0), GeoPoint::new(1.0, 0.0), GeoPoint::new(1.0, 1.0)];
        assert!(!is_closed(&ring));
        close_ring(&mut ring);
        assert!(is_closed(&ring));
        assert_eq!(ring.len(), 4);

        // Idempotent
        close_ring(&mut ring);
        assert_eq!(ring.len(), 4);
    }

    #[test]
    fn test_ukraine_bounds() {
        assert!(UKRAINE_BOUNDS.contains(GeoPoint::new(50.45, 30.52)));
        assert!(!UKRAINE_BOUNDS.contains(GeoPoint::new(55.75, 37.61)));
        assert!(!UKRAINE_BOUNDS.contains(GeoPoint::new(0.0, 0.0)));
    }
}
