//! GPS point filtering.
//!
//! Decides whether a new coordinate is real movement, stationary jitter, or an
//! erroneous jump, relative to the last accepted point. The lower bound is
//! tiny so slow curves survive; the upper bound still admits a catch-up after
//! satellite re-acquisition.

use crate::geo_utils::distance_km;
use crate::GeoPoint;

/// Outcome of evaluating a candidate point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterDecision {
    /// Real movement. Carries the distance to fold into the total
    /// (0 for the first point of a segment).
    Accept { delta_km: f64 },
    /// At or below the noise threshold.
    RejectNoise { delta_km: f64 },
    /// At or above the jump threshold.
    RejectJump { delta_km: f64 },
}

impl FilterDecision {
    pub fn is_accept(&self) -> bool {
        matches!(self, FilterDecision::Accept { .. })
    }
}

/// Distance-threshold filter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointFilter {
    min_km: f64,
    max_km: f64,
}

impl Default for PointFilter {
    fn default() -> Self {
        Self::new(0.0001, 0.2)
    }
}

impl PointFilter {
    pub fn new(min_km: f64, max_km: f64) -> Self {
        Self { min_km, max_km }
    }

    pub fn min_km(&self) -> f64 {
        self.min_km
    }

    pub fn max_km(&self) -> f64 {
        self.max_km
    }

    /// Evaluate `candidate` against the last accepted point.
    ///
    /// With no previous point the candidate is always accepted: the first
    /// point of a session seeds the track unconditionally.
    pub fn evaluate(
        &self,
        candidate: &GeoPoint,
        last_accepted: Option<&GeoPoint>,
    ) -> FilterDecision {
        let Some(last) = last_accepted else {
            return FilterDecision::Accept { delta_km: 0.0 };
        };

        let delta_km = distance_km(last, candidate);
        if delta_km <= self.min_km {
            FilterDecision::RejectNoise { delta_km }
        } else if delta_km >= self.max_km {
            FilterDecision::RejectJump { delta_km }
        } else {
            FilterDecision::Accept { delta_km }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_point_always_accepted() {
        let filter = PointFilter::default();
        let decision = filter.evaluate(&GeoPoint::new(10.0, 10.0, 0), None);
        assert_eq!(decision, FilterDecision::Accept { delta_km: 0.0 });
    }

    #[test]
    fn test_noise_rejected() {
        let filter = PointFilter::default();
        let last = GeoPoint::new(0.0, 0.0, 0);
        // ~0.06 m
        let decision = filter.evaluate(&GeoPoint::new(0.0, 0.0000005, 1), Some(&last));
        assert!(matches!(decision, FilterDecision::RejectNoise { .. }));

        let same = filter.evaluate(&last, Some(&last));
        assert!(matches!(same, FilterDecision::RejectNoise { .. }));
    }

    #[test]
    fn test_jump_rejected() {
        let filter = PointFilter::default();
        let last = GeoPoint::new(0.0, 0.0, 0);
        // ~222 m
        let decision = filter.evaluate(&GeoPoint::new(0.0, 0.002, 1), Some(&last));
        assert!(matches!(decision, FilterDecision::RejectJump { .. }));
    }

    #[test]
    fn test_movement_accepted_with_delta() {
        let filter = PointFilter::default();
        let last = GeoPoint::new(0.0, 0.0, 0);
        // ~111 m
        match filter.evaluate(&GeoPoint::new(0.0, 0.001, 1), Some(&last)) {
            FilterDecision::Accept { delta_km } => assert!((delta_km - 0.1112).abs() < 0.001),
            other => panic!("expected accept, got {:?}", other),
        }
    }

    #[test]
    fn test_custom_thresholds() {
        let filter = PointFilter::new(0.0005, 0.1);
        let last = GeoPoint::new(0.0, 0.0, 0);
        // ~0.33 m is noise under the stricter lower bound
        assert!(!filter.evaluate(&GeoPoint::new(0.0, 0.000003, 1), Some(&last)).is_accept());
        // ~133 m is a jump under the tighter upper bound
        assert!(!filter.evaluate(&GeoPoint::new(0.0, 0.0012, 1), Some(&last)).is_accept());
    }
}
