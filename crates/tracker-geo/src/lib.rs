//! Haversine great-circle distance between two WGS84 points.

/// Mean Earth radius in meters, as used by the haversine approximation.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance between `(lat1, lon1)` and `(lat2, lon2)`, in
/// meters, on a sphere of radius [`EARTH_RADIUS_M`].
///
/// Inputs are decimal degrees. The result is always non-negative;
/// identical inputs return 0.
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let rlat1 = lat1.to_radians();
    let rlat2 = lat2.to_radians();

    let a = (dlat / 2.0).sin().powi(2) + rlat1.cos() * rlat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_M * c
}
