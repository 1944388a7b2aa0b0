//! Geo math: great-circle distance and hexagonal cell addressing.
//!
//! Surge pricing buckets the world into H3 resolution-8 cells (≈0.74 km²);
//! resolution 9 (≈0.10 km²) is reserved for finer-grained matching.

use h3o::{LatLng, Resolution};
use thiserror::Error;

/// Mean Earth radius in kilometers.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// H3 resolution used for surge cells.
pub const SURGE_RESOLUTION: Resolution = Resolution::Eight;

/// H3 resolution reserved for fine-grained dispatch matching.
pub const DISPATCH_RESOLUTION: Resolution = Resolution::Nine;

/// Errors from coordinate conversion.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GeoError {
    /// Latitude/longitude outside the valid range.
    #[error("invalid coordinates: {0}")]
    InvalidCoordinates(String),
}

/// Haversine great-circle distance between two points, in kilometers.
#[must_use]
pub fn haversine_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lng = (lng2 - lng1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_KM * c
}

/// H3 cell address for a coordinate at the given resolution.
///
/// # Errors
///
/// Returns [`GeoError::InvalidCoordinates`] for out-of-range lat/lng.
pub fn cell_address(lat: f64, lng: f64, resolution: Resolution) -> Result<String, GeoError> {
    let coord =
        LatLng::new(lat, lng).map_err(|e| GeoError::InvalidCoordinates(e.to_string()))?;
    Ok(coord.to_cell(resolution).to_string())
}

/// Surge-resolution cell address for a coordinate.
///
/// # Errors
///
/// Returns [`GeoError::InvalidCoordinates`] for out-of-range lat/lng.
pub fn surge_cell(lat: f64, lng: f64) -> Result<String, GeoError> {
    cell_address(lat, lng, SURGE_RESOLUTION)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn haversine_zero_for_same_point() {
        assert!(haversine_km(12.9716, 77.5946, 12.9716, 77.5946) < 1e-9);
    }

    #[test]
    fn haversine_known_distance() {
        // Bangalore city centre to the airport is roughly 32 km as the crow flies.
        let d = haversine_km(12.9716, 77.5946, 13.1986, 77.7066);
        assert!((25.0..40.0).contains(&d), "got {d}");
    }

    #[test]
    fn surge_cell_is_stable_for_a_point() {
        let a = surge_cell(12.9716, 77.5946).unwrap();
        let b = surge_cell(12.9716, 77.5946).unwrap();
        assert_eq!(a, b);
        assert!(!a.is_empty());
    }

    #[test]
    fn out_of_range_latitude_is_rejected() {
        assert!(surge_cell(123.0, 77.0).is_err());
    }
}
