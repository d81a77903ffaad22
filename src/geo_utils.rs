//! # Geographic Utilities
//!
//! Distance math and coordinate keys used by the filter and the reconciler.
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`distance_km`] | Great-circle distance between two points |
//! | [`polyline_length_km`] | Total length of a track |
//! | [`coordinate_key`] | Rounded `(lat, lng)` key for de-duplication |
//!
//! ## Haversine Formula
//!
//! Distances assume a spherical Earth of radius 6371 km. NaN inputs
//! propagate NaN; callers must drop invalid coordinates beforehand.

use crate::GeoPoint;

/// Mean Earth radius in kilometers.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance in kilometers between two points.
///
/// # Example
///
/// ```rust
/// use run_tracker::{GeoPoint, geo_utils};
///
/// let a = GeoPoint::new(0.0, 0.0, 0);
/// let b = GeoPoint::new(0.0, 1.0, 0);
/// let d = geo_utils::distance_km(&a, &b);
/// assert!((d - 111.19).abs() < 0.01);
/// ```
#[inline]
pub fn distance_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lng = (b.longitude - a.longitude).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.latitude.to_radians().cos()
            * b.latitude.to_radians().cos()
            * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

/// Total length of a track in kilometers. Empty or single-point tracks are 0.
pub fn polyline_length_km(points: &[GeoPoint]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }

    points
        .windows(2)
        .map(|w| distance_km(&w[0], &w[1]))
        .sum()
}

/// De-duplication key: coordinates rounded to `precision` decimal places and
/// stored as scaled integers so the key is hashable and immune to float
/// formatting noise from a serialization round-trip.
///
/// Two distinct points closer than the rounding step share a key. At the
/// default precision of 6 that is about 0.11 m.
pub fn coordinate_key(point: &GeoPoint, precision: u32) -> (i64, i64) {
    let scale = 10f64.powi(precision as i32);
    (
        (point.latitude * scale).round() as i64,
        (point.longitude * scale).round() as i64,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_known_pair() {
        let london = GeoPoint::new(51.5074, -0.1278, 0);
        let paris = GeoPoint::new(48.8566, 2.3522, 0);
        let d = distance_km(&london, &paris);
        assert!((d - 343.5).abs() < 1.0, "got {}", d);
    }

    #[test]
    fn test_distance_is_symmetric_and_zero_on_self() {
        let a = GeoPoint::new(-23.55, -46.63, 0);
        let b = GeoPoint::new(-23.56, -46.64, 0);
        assert_eq!(distance_km(&a, &a), 0.0);
        assert!((distance_km(&a, &b) - distance_km(&b, &a)).abs() < 1e-12);
    }

    #[test]
    fn test_small_equatorial_step() {
        // 0.00005 degrees of longitude at the equator is ~5.56 m
        let d = distance_km(&GeoPoint::new(0.0, 0.0, 0), &GeoPoint::new(0.0, 0.00005, 0));
        assert!((d - 0.00556).abs() < 0.00001, "got {}", d);
    }

    #[test]
    fn test_nan_propagates() {
        let d = distance_km(&GeoPoint::new(f64::NAN, 0.0, 0), &GeoPoint::new(0.0, 0.0, 0));
        assert!(d.is_nan());
    }

    #[test]
    fn test_polyline_length() {
        assert_eq!(polyline_length_km(&[]), 0.0);
        let track = vec![
            GeoPoint::new(0.0, 0.0, 0),
            GeoPoint::new(0.0, 0.001, 1),
            GeoPoint::new(0.0, 0.002, 2),
        ];
        let expected = 2.0 * distance_km(&track[0], &track[1]);
        assert!((polyline_length_km(&track) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_coordinate_key_absorbs_float_noise() {
        let a = GeoPoint::new(-23.550520, -46.633308, 0);
        let b = GeoPoint::new(-23.550520000000004, -46.63330799999999, 99);
        assert_eq!(coordinate_key(&a, 6), coordinate_key(&b, 6));

        let c = GeoPoint::new(-23.550521, -46.633308, 0);
        assert_ne!(coordinate_key(&a, 6), coordinate_key(&c, 6));
    }
}
