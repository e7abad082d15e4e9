use crate::geo::LatLon;

/// Mean Earth radius (meters), IUGG.
pub const EARTH_MEAN_RADIUS_M: f64 = 6_371_008.8;

/// Great-circle distance between two coordinates (meters), haversine formula.
pub fn haversine_m(a: LatLon, b: LatLon) -> f64 {
    let lat_a = a.lat.to_radians();
    let lat_b = b.lat.to_radians();
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lon = (b.lon - a.lon).to_radians();

    let h = (d_lat * 0.5).sin().powi(2) + lat_a.cos() * lat_b.cos() * (d_lon * 0.5).sin().powi(2);
    2.0 * EARTH_MEAN_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// Initial bearing from `a` towards `b`, degrees clockwise from north in `[0, 360)`.
pub fn initial_bearing_deg(a: LatLon, b: LatLon) -> f64 {
    let lat_a = a.lat.to_radians();
    let lat_b = b.lat.to_radians();
    let d_lon = (b.lon - a.lon).to_radians();

    let y = d_lon.sin() * lat_b.cos();
    let x = lat_a.cos() * lat_b.sin() - lat_a.sin() * lat_b.cos() * d_lon.cos();
    (y.atan2(x).to_degrees() + 360.0) % 360.0
}

/// Summed great-circle length of a polyline (meters).
pub fn path_length_m(points: &[LatLon]) -> f64 {
    points.windows(2).map(|w| haversine_m(w[0], w[1])).sum()
}
