//! Meter to degree conversion on the WGS84 ellipsoid.

/// WGS84 semi-major axis in meters.
pub const WGS84_A: f64 = 6_378_137.0;
/// WGS84 flattening.
pub const WGS84_F: f64 = 1.0 / 298.257_223_563;

/// Converts a distance in meters to (latitude, longitude) degree deltas at
/// the given reference latitude.
///
/// Latitude uses the radius of curvature in the meridian (M), longitude the
/// radius of curvature in the prime vertical (N) scaled by cos(lat), so the
/// two deltas differ everywhere except at the equator.
///
/// Unguarded near the poles: cos(lat) tends to zero and the longitude delta
/// diverges.
pub fn meters_to_degrees(meters: f64, latitude: f64) -> (f64, f64) {
    let e2 = WGS84_F * (2.0 - WGS84_F);
    let phi = latitude.to_radians();
    let sin2_phi = phi.sin() * phi.sin();

    // Prime vertical and meridian radii of curvature.
    let n = WGS84_A / (1.0 - e2 * sin2_phi).sqrt();
    let m = WGS84_A * (1.0 - e2) / (1.0 - e2 * sin2_phi).powf(1.5);

    let delta_lat = (meters / m).to_degrees();
    let delta_lon = (meters / (n * phi.cos())).to_degrees();

    (delta_lat, delta_lon)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deltas_converge_at_equator() {
        let (dlat, dlon) = meters_to_degrees(100.0, 0.0);
        let relative = (dlat - dlon).abs() / dlon;
        assert!(
            relative < 0.01,
            "lat/lon deltas should agree within 1% at the equator, got {} vs {}",
            dlat,
            dlon
        );
    }

    #[test]
    fn test_one_degree_of_latitude_at_45_north() {
        // A degree of latitude at 45N is about 111.13 km.
        let (dlat, _) = meters_to_degrees(111_132.0, 45.0);
        assert!((dlat - 1.0).abs() < 0.01, "got {}", dlat);
    }

    #[test]
    fn test_longitude_shrinks_with_latitude() {
        let (_, dlon_equator) = meters_to_degrees(1000.0, 0.0);
        let (_, dlon_60) = meters_to_degrees(1000.0, 60.0);
        // At 60N a meter spans roughly twice the longitude degrees.
        assert!(dlon_60 > 1.9 * dlon_equator);
        assert!(dlon_60 < 2.1 * dlon_equator);
    }
}
