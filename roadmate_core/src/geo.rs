//! Geodesy helpers shared by every distance-based decision.
//!
//! All thresholds in the crate (query radius, alert hysteresis, step
//! arrival, off-route tolerance, vote proximity) are compared against
//! [`distance_m`], so they stay mutually consistent.

use ::geo::{HaversineDistance, Point};
use roadmate_env::GeoPoint;

/// Mean earth radius used by the haversine formula (meters).
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Meters per degree of latitude on the mean sphere.
pub const METERS_PER_DEGREE: f64 = EARTH_RADIUS_M * std::f64::consts::PI / 180.0;

/// Great-circle (haversine) distance in meters.
pub fn distance_m(a: GeoPoint, b: GeoPoint) -> f64 {
    Point::new(a.lon, a.lat).haversine_distance(&Point::new(b.lon, b.lat))
}

/// Great-circle distance in kilometers.
pub fn distance_km(a: GeoPoint, b: GeoPoint) -> f64 {
    distance_m(a, b) / 1000.0
}

/// True if `(lat, lon)` is finite and within WGS84 bounds.
pub fn valid_coordinates(lat: f64, lon: f64) -> bool {
    GeoPoint::new(lat, lon).is_valid()
}

/// Wraps a longitude difference into [-180, 180).
fn wrap_lon_delta(delta: f64) -> f64 {
    (delta + 540.0).rem_euclid(360.0) - 180.0
}

/// Distance from `p` to the segment `a`-`b`, in meters.
///
/// The foot point is found in a local equirectangular frame centred on `p`
/// and clamped to the segment ends; the distance to it is then measured
/// with [`distance_m`].
pub fn distance_to_segment_m(p: GeoPoint, a: GeoPoint, b: GeoPoint) -> f64 {
    let cos_lat = p.lat.to_radians().cos();

    // Local frame (degrees scaled so both axes are comparable)
    let ax = wrap_lon_delta(a.lon - p.lon) * cos_lat;
    let ay = a.lat - p.lat;
    let bx = wrap_lon_delta(b.lon - p.lon) * cos_lat;
    let by = b.lat - p.lat;

    let dx = bx - ax;
    let dy = by - ay;
    let len_sq = dx * dx + dy * dy;

    if len_sq <= f64::EPSILON {
        return distance_m(p, a);
    }

    // Projection of the origin (p) onto the segment
    let t = (-(ax * dx + ay * dy) / len_sq).clamp(0.0, 1.0);

    let foot_lat = a.lat + t * (b.lat - a.lat);
    let foot_lon = a.lon + t * wrap_lon_delta(b.lon - a.lon);
    let foot_lon = wrap_lon_delta(foot_lon);

    distance_m(p, GeoPoint::new(foot_lat, foot_lon))
}

/// Moves `p` by the given north/east offsets in meters (small offsets only).
pub fn offset_m(p: GeoPoint, north_m: f64, east_m: f64) -> GeoPoint {
    let dlat = north_m / METERS_PER_DEGREE;
    let cos_lat = p.lat.to_radians().cos().max(1e-6);
    let dlon = east_m / (METERS_PER_DEGREE * cos_lat);
    GeoPoint::new(p.lat + dlat, wrap_lon_delta(p.lon + dlon))
}
