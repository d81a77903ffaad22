//! # Active Run Snapshot
//!
//! A resumable, point-in-time copy of the whole session, stored as JSON under
//! a single well-known key and overwritten on every save.
//!
//! Elapsed time in a loaded snapshot is recomputed from `startTimeMillis`
//! against the current clock; the stored value is only trusted for paused
//! runs. Snapshots older than the configured maximum age (24 h by default)
//! are deleted on load and never resumed.

use std::sync::Arc;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::platform::Clock;
use crate::storage::{keys, KeyValueStore};
use crate::{GeoPoint, PaceSample, Result, TrackingConfig};

/// Persisted session state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSnapshot {
    pub is_tracking: bool,
    pub is_paused: bool,
    pub start_time_millis: Option<i64>,
    pub paused_elapsed_seconds: u64,
    pub distance_km: f64,
    /// Derived; recomputed from `start_time_millis` on load
    pub elapsed_seconds: u64,
    #[serde(default)]
    pub points: Vec<GeoPoint>,
    #[serde(default)]
    pub pace_samples: Vec<PaceSample>,
    pub last_point: Option<GeoPoint>,
    pub snapshot_timestamp: i64,
    /// Run the background buffer was tagged with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

impl RunSnapshot {
    /// Whether the snapshot describes a run that was moving when saved.
    pub fn is_running(&self) -> bool {
        self.is_tracking && !self.is_paused
    }

    /// Elapsed seconds as of `now_ms`.
    pub fn elapsed_seconds_at(&self, now_ms: i64) -> u64 {
        match self.start_time_millis {
            Some(start) if self.is_running() => ((now_ms - start).max(0) / 1000) as u64,
            _ => self.paused_elapsed_seconds,
        }
    }

    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms - self.snapshot_timestamp
    }
}

/// Reads and writes the active-run snapshot.
pub struct ActiveRunStateStore {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    max_age_ms: i64,
}

impl ActiveRunStateStore {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        config: &TrackingConfig,
    ) -> Self {
        Self {
            store,
            clock,
            max_age_ms: config.snapshot_max_age_ms,
        }
    }

    /// Overwrite the stored snapshot.
    pub fn save(&self, snapshot: &RunSnapshot) -> Result<()> {
        let json = serde_json::to_string(snapshot)?;
        self.store.set(keys::ACTIVE_RUN, &json)?;
        debug!(
            "[RunStateStore] saved {} points, {:.3} km, {}s",
            snapshot.points.len(),
            snapshot.distance_km,
            snapshot.elapsed_seconds
        );
        Ok(())
    }

    /// Load the stored snapshot, if any is still fresh.
    ///
    /// Stale and undecodable snapshots are removed and reported as `None`.
    pub fn load(&self) -> Result<Option<RunSnapshot>> {
        let Some(json) = self.store.get(keys::ACTIVE_RUN)? else {
            return Ok(None);
        };

        let mut snapshot: RunSnapshot = match serde_json::from_str(&json) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("[RunStateStore] discarding unreadable snapshot: {}", e);
                self.discard();
                return Ok(None);
            }
        };

        let now = self.clock.now_ms();
        let age = snapshot.age_ms(now);
        if age > self.max_age_ms {
            info!(
                "[RunStateStore] discarding stale snapshot ({} h old)",
                age / 3_600_000
            );
            self.discard();
            return Ok(None);
        }

        snapshot.elapsed_seconds = snapshot.elapsed_seconds_at(now);
        Ok(Some(snapshot))
    }

    pub fn clear(&self) -> Result<()> {
        self.store.remove(keys::ACTIVE_RUN)
    }

    fn discard(&self) {
        if let Err(e) = self.clear() {
            warn!("[RunStateStore] failed to remove snapshot: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::ManualClock;
    use crate::storage::MemoryStore;

    const HOUR_MS: i64 = 3_600_000;

    fn snapshot(now: i64) -> RunSnapshot {
        RunSnapshot {
            is_tracking: true,
            is_paused: false,
            start_time_millis: Some(now - 65_000),
            paused_elapsed_seconds: 0,
            distance_km: 0.42,
            elapsed_seconds: 65,
            points: vec![GeoPoint::new(1.0, 2.0, now - 60_000), GeoPoint::new(1.0, 2.001, now)],
            pace_samples: vec![PaceSample {
                elapsed_seconds: 60,
                distance_km: 0.4,
                pace_min_per_km: 2.5,
            }],
            last_point: Some(GeoPoint::new(1.0, 2.001, now)),
            snapshot_timestamp: now,
            run_id: Some("run-1".into()),
        }
    }

    fn fixture(now: i64) -> (Arc<MemoryStore>, Arc<ManualClock>, ActiveRunStateStore) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(now));
        let states =
            ActiveRunStateStore::new(store.clone(), clock.clone(), &TrackingConfig::default());
        (store, clock, states)
    }

    #[test]
    fn test_round_trip() {
        let now = 100 * HOUR_MS;
        let (_, _, states) = fixture(now);
        let snap = snapshot(now);
        states.save(&snap).unwrap();
        assert_eq!(states.load().unwrap(), Some(snap));
    }

    #[test]
    fn test_one_hour_old_is_restored_with_recomputed_elapsed() {
        let now = 100 * HOUR_MS;
        let (_, clock, states) = fixture(now);
        states.save(&snapshot(now)).unwrap();

        clock.advance(HOUR_MS);
        let loaded = states.load().unwrap().unwrap();
        assert_eq!(loaded.elapsed_seconds, 65 + 3600);
        assert_eq!(loaded.points.len(), 2);
    }

    #[test]
    fn test_stale_snapshot_is_deleted() {
        let now = 100 * HOUR_MS;
        let (store, clock, states) = fixture(now);
        states.save(&snapshot(now)).unwrap();

        clock.advance(25 * HOUR_MS);
        assert_eq!(states.load().unwrap(), None);
        assert!(store.get(keys::ACTIVE_RUN).unwrap().is_none());
    }

    #[test]
    fn test_paused_snapshot_keeps_frozen_elapsed() {
        let now = 100 * HOUR_MS;
        let (_, clock, states) = fixture(now);
        let mut snap = snapshot(now);
        snap.is_paused = true;
        snap.paused_elapsed_seconds = 42;
        states.save(&snap).unwrap();

        clock.advance(10 * 60_000);
        assert_eq!(states.load().unwrap().unwrap().elapsed_seconds, 42);
    }

    #[test]
    fn test_corrupt_snapshot_is_discarded() {
        let (store, _, states) = fixture(0);
        store.set(keys::ACTIVE_RUN, "{not json").unwrap();
        assert_eq!(states.load().unwrap(), None);
        assert!(store.is_empty());
    }

    #[test]
    fn test_json_field_names() {
        let json = serde_json::to_value(snapshot(10_000)).unwrap();
        for key in [
            "isTracking",
            "isPaused",
            "startTimeMillis",
            "pausedElapsedSeconds",
            "distanceKm",
            "elapsedSeconds",
            "points",
            "paceSamples",
            "lastPoint",
            "snapshotTimestamp",
        ] {
            assert!(json.get(key).is_some(), "missing {}", key);
        }
    }
}
