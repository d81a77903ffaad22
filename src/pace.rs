//! Pace-over-time sampling.
//!
//! Pace is the cumulative average, `(elapsed / 60) / distance` in min/km.
//! Samples outside `0 < pace < max_pace_min_per_km` are sensor artifacts and
//! are never stored.

use log::trace;

use crate::{PaceSample, TrackingConfig};

#[derive(Debug, Clone)]
pub struct PaceSampler {
    samples: Vec<PaceSample>,
    last_check_ms: Option<i64>,
    check_interval_ms: i64,
    min_interval_secs: u64,
    min_distance_km: f64,
    first_distance_km: f64,
    max_pace: f64,
}

impl PaceSampler {
    pub fn new(config: &TrackingConfig) -> Self {
        Self {
            samples: Vec::new(),
            last_check_ms: None,
            check_interval_ms: config.pace_check_interval_ms,
            min_interval_secs: config.pace_min_interval_secs,
            min_distance_km: config.pace_min_distance_km,
            first_distance_km: config.pace_first_distance_km,
            max_pace: config.max_pace_min_per_km,
        }
    }

    /// Pace in min/km, or `None` if it falls outside the accepted range.
    pub fn pace_for(&self, elapsed_seconds: u64, distance_km: f64) -> Option<f64> {
        if elapsed_seconds == 0 || !(distance_km > 0.0) {
            return None;
        }
        let pace = (elapsed_seconds as f64 / 60.0) / distance_km;
        (pace > 0.0 && pace < self.max_pace).then_some(pace)
    }

    /// Append a sample if one is due. Checks run at most once per check
    /// interval of wall-clock time.
    pub fn maybe_sample(
        &mut self,
        now_ms: i64,
        elapsed_seconds: u64,
        distance_km: f64,
    ) -> Option<PaceSample> {
        if !(distance_km > 0.0) {
            return None;
        }
        if let Some(last) = self.last_check_ms {
            if now_ms - last < self.check_interval_ms {
                return None;
            }
        }
        self.last_check_ms = Some(now_ms);

        let due = match self.samples.last() {
            None => {
                elapsed_seconds >= self.min_interval_secs || distance_km >= self.first_distance_km
            }
            Some(prev) => {
                elapsed_seconds.saturating_sub(prev.elapsed_seconds) >= self.min_interval_secs
                    || distance_km - prev.distance_km >= self.min_distance_km
            }
        };
        if !due {
            return None;
        }
        self.push(elapsed_seconds, distance_km)
    }

    /// Record a final sample when a run finishes without any.
    pub fn backfill(&mut self, elapsed_seconds: u64, distance_km: f64) -> Option<PaceSample> {
        if !self.samples.is_empty() {
            return None;
        }
        self.push(elapsed_seconds, distance_km)
    }

    fn push(&mut self, elapsed_seconds: u64, distance_km: f64) -> Option<PaceSample> {
        let Some(pace) = self.pace_for(elapsed_seconds, distance_km) else {
            trace!(
                "[PaceSampler] dropped out-of-range pace at {}s / {:.3} km",
                elapsed_seconds,
                distance_km
            );
            return None;
        };
        let sample = PaceSample {
            elapsed_seconds,
            distance_km,
            pace_min_per_km: pace,
        };
        self.samples.push(sample);
        Some(sample)
    }

    /// Replace the series with persisted samples, dropping any out of range.
    pub fn restore(&mut self, samples: Vec<PaceSample>) {
        let max = self.max_pace;
        self.samples = samples
            .into_iter()
            .filter(|s| s.pace_min_per_km > 0.0 && s.pace_min_per_km < max)
            .collect();
        self.last_check_ms = None;
    }

    pub fn reset(&mut self) {
        self.samples.clear();
        self.last_check_ms = None;
    }

    pub fn samples(&self) -> &[PaceSample] {
        &self.samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sampler() -> PaceSampler {
        PaceSampler::new(&TrackingConfig::default())
    }

    #[test]
    fn test_no_sample_without_distance() {
        let mut s = sampler();
        assert!(s.maybe_sample(0, 60, 0.0).is_none());
        assert!(s.samples().is_empty());
    }

    #[test]
    fn test_first_sample_and_rate_limit() {
        let mut s = sampler();
        // 6 min over 1 km
        let first = s.maybe_sample(0, 360, 1.0).unwrap();
        assert!((first.pace_min_per_km - 6.0).abs() < 1e-9);

        // inside the 5 s check window
        assert!(s.maybe_sample(4_000, 400, 1.2).is_none());
        assert!(s.maybe_sample(5_000, 405, 1.2).is_some());
        assert_eq!(s.samples().len(), 2);
    }

    #[test]
    fn test_first_sample_looser_distance_bound() {
        let mut s = sampler();
        // 3 s elapsed but 25 m covered
        assert!(s.maybe_sample(0, 3, 0.025).is_some());
    }

    #[test]
    fn test_later_samples_need_progress() {
        let mut s = sampler();
        s.maybe_sample(0, 360, 1.0).unwrap();
        // 3 s and 10 m later
        assert!(s.maybe_sample(10_000, 363, 1.01).is_none());
        // 60 m later
        assert!(s.maybe_sample(20_000, 364, 1.06).is_some());
    }

    #[test]
    fn test_out_of_range_pace_dropped() {
        let mut s = sampler();
        // 40 min/km walking pace
        assert!(s.maybe_sample(0, 2_400, 1.0).is_none());
        assert!(s.samples().is_empty());
        assert!(s.samples().iter().all(|p| p.pace_min_per_km > 0.0 && p.pace_min_per_km < 30.0));
    }

    #[test]
    fn test_backfill_only_when_empty() {
        let mut s = sampler();
        assert!(s.backfill(300, 1.0).is_some());
        assert!(s.backfill(600, 2.0).is_none());
        assert_eq!(s.samples().len(), 1);
    }

    #[test]
    fn test_restore_filters_artifacts() {
        let mut s = sampler();
        s.restore(vec![
            PaceSample {
                elapsed_seconds: 60,
                distance_km: 0.2,
                pace_min_per_km: 5.0,
            },
            PaceSample {
                elapsed_seconds: 61,
                distance_km: 0.0001,
                pace_min_per_km: 10_166.0,
            },
        ]);
        assert_eq!(s.samples().len(), 1);
    }
}
