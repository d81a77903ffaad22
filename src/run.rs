//! The finished-run record handed to run-history storage.

use chrono::{SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{GeoPoint, PaceSample};

/// Calorie formula supplied by the host. Without one, calories are 0.
pub trait CalorieEstimator: Send + Sync {
    fn estimate(&self, distance_km: f64, duration_seconds: u64) -> u32;
}

/// A completed run. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct FinishedRun {
    pub id: String,
    pub distance_meters: u64,
    pub duration_millis: u64,
    /// RFC 3339 UTC, millisecond precision
    pub timestamp_iso: String,
    pub path_points: Vec<GeoPoint>,
    pub avg_speed_kmh: f64,
    pub pace_samples: Vec<PaceSample>,
    pub calories_burned: u32,
}

impl FinishedRun {
    pub fn new(
        distance_km: f64,
        elapsed_seconds: u64,
        finished_at_ms: i64,
        path_points: Vec<GeoPoint>,
        pace_samples: Vec<PaceSample>,
        calories_burned: u32,
    ) -> Self {
        let distance_km = if distance_km.is_finite() { distance_km.max(0.0) } else { 0.0 };
        Self {
            id: Uuid::new_v4().to_string(),
            distance_meters: (distance_km * 1000.0).round() as u64,
            duration_millis: elapsed_seconds * 1000,
            timestamp_iso: iso_timestamp(finished_at_ms),
            path_points,
            avg_speed_kmh: average_speed_kmh(distance_km, elapsed_seconds),
            pace_samples,
            calories_burned,
        }
    }
}

/// Average speed rounded to 2 decimals; 0 when distance or time is 0.
pub fn average_speed_kmh(distance_km: f64, elapsed_seconds: u64) -> f64 {
    if elapsed_seconds == 0 || distance_km <= 0.0 {
        return 0.0;
    }
    let kmh = distance_km / (elapsed_seconds as f64 / 3600.0);
    (kmh * 100.0).round() / 100.0
}

fn iso_timestamp(epoch_ms: i64) -> String {
    Utc.timestamp_millis_opt(epoch_ms)
        .single()
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Result of `finish()`. A zero-distance run is still produced; the caller
/// must confirm before saving it.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum FinishOutcome {
    Completed { run: FinishedRun },
    ZeroDistance { run: FinishedRun },
}

impl FinishOutcome {
    pub fn is_zero_distance(&self) -> bool {
        matches!(self, FinishOutcome::ZeroDistance { .. })
    }

    pub fn run(&self) -> &FinishedRun {
        match self {
            FinishOutcome::Completed { run } | FinishOutcome::ZeroDistance { run } => run,
        }
    }

    pub fn into_run(self) -> FinishedRun {
        match self {
            FinishOutcome::Completed { run } | FinishOutcome::ZeroDistance { run } => run,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finished_run_fields() {
        // 2024-01-01T00:00:00Z
        let run = FinishedRun::new(5.0, 1800, 1_704_067_200_000, vec![], vec![], 320);
        assert_eq!(run.distance_meters, 5000);
        assert_eq!(run.duration_millis, 1_800_000);
        assert_eq!(run.avg_speed_kmh, 10.0);
        assert_eq!(run.timestamp_iso, "2024-01-01T00:00:00.000Z");
        assert_eq!(run.calories_burned, 320);
        assert!(Uuid::parse_str(&run.id).is_ok());
    }

    #[test]
    fn test_average_speed_rounding() {
        assert_eq!(average_speed_kmh(1.0, 0), 0.0);
        assert_eq!(average_speed_kmh(0.0, 60), 0.0);
        // 1 km in 7 minutes = 8.571428...
        assert_eq!(average_speed_kmh(1.0, 420), 8.57);
    }

    #[test]
    fn test_distance_meters_rounds() {
        let run = FinishedRun::new(0.0111, 10, 0, vec![], vec![], 0);
        assert_eq!(run.distance_meters, 11);
    }

    #[test]
    fn test_outcome_accessors() {
        let run = FinishedRun::new(0.0, 30, 0, vec![], vec![], 0);
        let outcome = FinishOutcome::ZeroDistance { run: run.clone() };
        assert!(outcome.is_zero_distance());
        assert_eq!(outcome.run().duration_millis, 30_000);
        assert_eq!(outcome.into_run(), run);
    }
}
