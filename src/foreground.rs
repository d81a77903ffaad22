//! Foreground collection: the in-memory track that drives the live UI.

use log::trace;

use crate::accumulator::DistanceAccumulator;
use crate::filter::PointFilter;
use crate::{GeoFix, GeoPoint};

/// In-process track and distance fed by the foreground subscription.
///
/// This is the authoritative track. The reconciler merges background
/// progress into it; nothing else writes to it.
#[derive(Debug, Clone)]
pub struct ForegroundCollector {
    accumulator: DistanceAccumulator,
    current_fix: Option<GeoFix>,
}

impl ForegroundCollector {
    pub fn new(filter: PointFilter) -> Self {
        Self {
            accumulator: DistanceAccumulator::new(filter),
            current_fix: None,
        }
    }

    /// Feed one raw fix. Returns the point if the filter accepted it.
    ///
    /// The fix becomes the current fix even when rejected, so the UI can
    /// show where the device thinks it is.
    pub fn on_fix(&mut self, fix: GeoFix, now_ms: i64) -> Option<GeoPoint> {
        let point = fix.to_point(now_ms)?;
        self.current_fix = Some(fix);
        if self.accumulator.offer(point).was_accepted {
            trace!(
                "[ForegroundCollector] accepted ({:.6}, {:.6}), total {:.4} km",
                point.latitude,
                point.longitude,
                self.accumulator.total_km()
            );
            Some(point)
        } else {
            None
        }
    }

    /// Seed the track from a one-shot fix. No-op once any point exists.
    pub fn seed(&mut self, fix: GeoFix, now_ms: i64) -> bool {
        if !self.accumulator.is_empty() {
            return false;
        }
        self.on_fix(fix, now_ms).is_some()
    }

    pub fn restore(&mut self, points: Vec<GeoPoint>, total_km: f64, last_point: Option<GeoPoint>) {
        let filter = *self.accumulator.filter();
        self.accumulator = DistanceAccumulator::restore(filter, points, total_km, last_point);
        self.current_fix = None;
    }

    pub fn reset(&mut self) {
        self.accumulator.reset();
        self.current_fix = None;
    }

    pub fn accumulator_mut(&mut self) -> &mut DistanceAccumulator {
        &mut self.accumulator
    }

    pub fn points(&self) -> &[GeoPoint] {
        self.accumulator.points()
    }

    pub fn total_km(&self) -> f64 {
        self.accumulator.total_km()
    }

    pub fn last_point(&self) -> Option<GeoPoint> {
        self.accumulator.last_accepted().copied()
    }

    pub fn current_fix(&self) -> Option<GeoFix> {
        self.current_fix
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_on_fix_publishes_accepted_points() {
        let mut fg = ForegroundCollector::new(PointFilter::default());
        assert!(fg.on_fix(GeoFix::new(0.0, 0.0, 0), 0).is_some());
        assert!(fg.on_fix(GeoFix::new(0.0, 0.0, 1), 1).is_none());
        assert_eq!(fg.current_fix(), Some(GeoFix::new(0.0, 0.0, 1)));
        assert_eq!(fg.points().len(), 1);
    }

    #[test]
    fn test_missing_coordinates_ignored() {
        let mut fg = ForegroundCollector::new(PointFilter::default());
        assert!(fg.on_fix(GeoFix::new(f64::NAN, 0.0, 0), 0).is_none());
        assert!(fg.current_fix().is_none());
        assert!(fg.points().is_empty());
    }

    #[test]
    fn test_seed_only_when_empty() {
        let mut fg = ForegroundCollector::new(PointFilter::default());
        assert!(fg.seed(GeoFix::new(0.0, 0.0, 0), 0));
        assert!(!fg.seed(GeoFix::new(0.0, 0.001, 1), 1));
        assert_eq!(fg.points().len(), 1);
    }

    #[test]
    fn test_restore_then_continue() {
        let mut fg = ForegroundCollector::new(PointFilter::default());
        fg.restore(
            vec![GeoPoint::new(0.0, 0.0, 0), GeoPoint::new(0.0, 0.0005, 1)],
            0.0556,
            None,
        );
        assert_eq!(fg.last_point(), Some(GeoPoint::new(0.0, 0.0005, 1)));
        assert!(fg.on_fix(GeoFix::new(0.0, 0.001, 2), 2).is_some());
        assert!(fg.total_km() > 0.11);

        fg.reset();
        assert_eq!(fg.total_km(), 0.0);
        assert!(fg.last_point().is_none());
    }
}
