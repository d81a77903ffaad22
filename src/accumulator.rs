//! Running distance and accepted-point list for one collector.
//!
//! `offer` is the only path that grows the total. The reconciler may raise it
//! through [`DistanceAccumulator::apply_merge`], which only ever takes the
//! maximum, so the total is non-decreasing for the accumulator's lifetime.

use log::trace;

use crate::filter::{FilterDecision, PointFilter};
use crate::GeoPoint;

/// Result of offering a candidate point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OfferOutcome {
    pub was_accepted: bool,
    pub decision: FilterDecision,
}

/// Total distance plus the ordered list of accepted points.
#[derive(Debug, Clone)]
pub struct DistanceAccumulator {
    filter: PointFilter,
    total_km: f64,
    points: Vec<GeoPoint>,
    last_accepted: Option<GeoPoint>,
}

impl DistanceAccumulator {
    pub fn new(filter: PointFilter) -> Self {
        Self {
            filter,
            total_km: 0.0,
            points: Vec::new(),
            last_accepted: None,
        }
    }

    /// Rebuild an accumulator from persisted state.
    ///
    /// `last_accepted` falls back to the final point of the track.
    pub fn restore(
        filter: PointFilter,
        points: Vec<GeoPoint>,
        total_km: f64,
        last_accepted: Option<GeoPoint>,
    ) -> Self {
        let last_accepted = points.last().copied().or(last_accepted);
        Self {
            filter,
            total_km: if total_km.is_finite() { total_km.max(0.0) } else { 0.0 },
            points,
            last_accepted,
        }
    }

    /// Run `candidate` through the filter and fold it in if accepted.
    pub fn offer(&mut self, candidate: GeoPoint) -> OfferOutcome {
        let decision = self.filter.evaluate(&candidate, self.last_accepted.as_ref());
        match decision {
            FilterDecision::Accept { delta_km } => {
                self.total_km += delta_km;
                self.points.push(candidate);
                self.last_accepted = Some(candidate);
            }
            FilterDecision::RejectNoise { delta_km } => {
                trace!("[Accumulator] noise rejected ({:.5} km)", delta_km);
            }
            FilterDecision::RejectJump { delta_km } => {
                trace!("[Accumulator] jump rejected ({:.4} km)", delta_km);
            }
        }
        OfferOutcome {
            was_accepted: decision.is_accept(),
            decision,
        }
    }

    /// Append reconciled points and raise the total to `distance_km` if larger.
    ///
    /// The last accepted point becomes the tail of the merged track.
    pub fn apply_merge(&mut self, new_points: Vec<GeoPoint>, distance_km: f64) {
        self.points.extend(new_points);
        if let Some(last) = self.points.last() {
            self.last_accepted = Some(*last);
        }
        if distance_km.is_finite() && distance_km > self.total_km {
            self.total_km = distance_km;
        }
    }

    /// Keep only the newest `max_points` points.
    pub fn truncate_front(&mut self, max_points: usize) {
        if self.points.len() > max_points {
            let excess = self.points.len() - max_points;
            self.points.drain(..excess);
        }
    }

    pub fn reset(&mut self) {
        self.total_km = 0.0;
        self.points.clear();
        self.last_accepted = None;
    }

    pub fn total_km(&self) -> f64 {
        self.total_km
    }

    pub fn points(&self) -> &[GeoPoint] {
        &self.points
    }

    pub fn last_accepted(&self) -> Option<&GeoPoint> {
        self.last_accepted.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn filter(&self) -> &PointFilter {
        &self.filter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acc() -> DistanceAccumulator {
        DistanceAccumulator::new(PointFilter::default())
    }

    #[test]
    fn test_first_point_seeds_without_distance() {
        let mut acc = acc();
        let outcome = acc.offer(GeoPoint::new(0.0, 0.0, 0));
        assert!(outcome.was_accepted);
        assert_eq!(acc.total_km(), 0.0);
        assert_eq!(acc.points().len(), 1);
        assert_eq!(acc.last_accepted(), Some(&GeoPoint::new(0.0, 0.0, 0)));
    }

    #[test]
    fn test_stationary_input_changes_nothing() {
        let mut acc = acc();
        acc.offer(GeoPoint::new(0.0, 0.0, 0));
        acc.offer(GeoPoint::new(0.0, 0.0001, 1));
        let total = acc.total_km();

        for i in 0..50 {
            // all within ~0.05 m of the last accepted point
            let jitter = (i % 5) as f64 * 0.0000001;
            let outcome = acc.offer(GeoPoint::new(jitter, 0.0001 + jitter, 2 + i));
            assert!(!outcome.was_accepted);
        }
        assert_eq!(acc.total_km(), total);
        assert_eq!(acc.points().len(), 2);
    }

    #[test]
    fn test_jump_leaves_last_accepted_untouched() {
        let mut acc = acc();
        acc.offer(GeoPoint::new(0.0, 0.0, 0));
        let outcome = acc.offer(GeoPoint::new(0.0, 0.01, 1));
        assert!(matches!(outcome.decision, FilterDecision::RejectJump { .. }));
        assert_eq!(acc.total_km(), 0.0);
        assert_eq!(acc.last_accepted(), Some(&GeoPoint::new(0.0, 0.0, 0)));
    }

    #[test]
    fn test_total_is_monotonic() {
        let mut acc = acc();
        let mut previous = 0.0;
        // mix of moves, noise and jumps
        let lngs = [0.0, 0.0001, 0.0001, 0.05, 0.0003, 0.00030001, 0.0006, 1.0, 0.0009];
        for (i, lng) in lngs.iter().enumerate() {
            acc.offer(GeoPoint::new(0.0, *lng, i as i64));
            assert!(acc.total_km() >= previous);
            previous = acc.total_km();
        }
        assert_eq!(acc.points().len(), 5);
    }

    #[test]
    fn test_apply_merge_takes_max() {
        let mut acc = acc();
        acc.offer(GeoPoint::new(0.0, 0.0, 0));
        acc.offer(GeoPoint::new(0.0, 0.001, 1));
        let before = acc.total_km();

        acc.apply_merge(vec![GeoPoint::new(0.0, 0.002, 2)], 0.01);
        assert_eq!(acc.total_km(), before);
        assert_eq!(acc.last_accepted(), Some(&GeoPoint::new(0.0, 0.002, 2)));

        acc.apply_merge(Vec::new(), 5.0);
        assert_eq!(acc.total_km(), 5.0);
    }

    #[test]
    fn test_restore_and_truncate() {
        let points: Vec<GeoPoint> = (0..10)
            .map(|i| GeoPoint::new(0.0, i as f64 * 0.001, i))
            .collect();
        let mut acc = DistanceAccumulator::restore(PointFilter::default(), points, 1.0, None);
        assert_eq!(acc.last_accepted().unwrap().timestamp_ms, Some(9));

        acc.truncate_front(3);
        assert_eq!(acc.points().len(), 3);
        assert_eq!(acc.points()[0].timestamp_ms, Some(7));
        assert_eq!(acc.total_km(), 1.0);
    }
}
