/// Coordinate validity rules shared by the tracker, the fallback resolver
/// and the geocoding queue.

/// Check whether a (lat, lon) pair is usable for mapping.
///
/// Rejects NaN, out-of-range values and the (0, 0) origin sentinel, which
/// the upstream GPS protocol uses to mean "no fix" rather than a real
/// location off the West African coast.
pub fn is_valid_position(lat: f64, lon: f64) -> bool {
    if lat.is_nan() || lon.is_nan() {
        return false;
    }
    if lat.abs() > 90.0 || lon.abs() > 180.0 {
        return false;
    }
    if lat == 0.0 && lon == 0.0 {
        return false;
    }
    true
}

/// Validate an optional coordinate pair, collapsing a lone latitude or
/// longitude to no position at all.
pub fn valid_pair(lat: Option<f64>, lon: Option<f64>) -> Option<(f64, f64)> {
    match (lat, lon) {
        (Some(lat), Some(lon)) if is_valid_position(lat, lon) => Some((lat, lon)),
        _ => None,
    }
}
