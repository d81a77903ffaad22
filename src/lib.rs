//! # Run Tracker
//!
//! GPS run tracking core for mobile running apps.
//!
//! This library provides:
//! - GPS noise and jump filtering with incremental distance accumulation
//! - Foreground and background collectors that never share memory
//! - Reconciliation of the two collected tracks into one duplicate-free path
//! - A durable, resumable "active run" snapshot that survives process death
//! - The Idle/Tracking/Paused session state machine that ties it together
//!
//! ## Features
//!
//! - **`persistence`** - SQLite-backed durable key-value store
//! - **`ffi`** - FFI bindings for mobile platforms (iOS/Android)
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use run_tracker::{DistanceAccumulator, GeoPoint, TrackingConfig};
//!
//! let mut acc = DistanceAccumulator::new(TrackingConfig::default().filter());
//! acc.offer(GeoPoint::new(0.0, 0.0, 0));
//! acc.offer(GeoPoint::new(0.0, 0.00005, 1_000));
//!
//! assert_eq!(acc.points().len(), 2);
//! assert!(acc.total_km() > 0.005);
//! ```

use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{OptionExt, Result, TrackingError};

// Geographic utilities (haversine distance, dedup keys)
pub mod geo_utils;

// Noise/jump filtering
pub mod filter;
pub use filter::{FilterDecision, PointFilter};

// Running distance and accepted-point list
pub mod accumulator;
pub use accumulator::{DistanceAccumulator, OfferOutcome};

// Durable key-value storage seam
pub mod storage;
pub use storage::{KeyValueStore, MemoryStore};

#[cfg(feature = "persistence")]
pub mod sqlite_store;
#[cfg(feature = "persistence")]
pub use sqlite_store::SqliteStore;

// Clock, scheduler and location provider seams
pub mod platform;
pub use platform::{
    select_background_strategy, BackgroundStrategy, Clock, LocationProvider, ManualClock,
    PermissionStatus, ReplayLocationProvider, Subscription, SystemClock,
};

pub mod scheduler;
pub use scheduler::{ManualScheduler, ScheduledTask, Scheduler, TokioScheduler};

// Collectors
pub mod foreground;
pub use foreground::ForegroundCollector;

pub mod background;
pub use background::{
    BackgroundBuffer, BackgroundCollector, BackgroundEvent, BackgroundTaskHandler, TaskRegistry,
};

// Dual-stream merge
pub mod reconcile;
pub use reconcile::{reconcile, ReconcileReport};

// Pace sampling
pub mod pace;
pub use pace::PaceSampler;

// Resumable run snapshot
pub mod snapshot;
pub use snapshot::{ActiveRunStateStore, RunSnapshot};

// Finished run output contract
pub mod run;
pub use run::{CalorieEstimator, FinishOutcome, FinishedRun};

// Orchestrator
pub mod session;
pub use session::{SessionState, TrackingSession};

// FFI bindings for mobile platforms (iOS/Android)
#[cfg(feature = "ffi")]
pub mod ffi;

#[cfg(feature = "ffi")]
uniffi::setup_scaffolding!();

/// Initialize logging for Android (only used in FFI)
#[cfg(all(feature = "ffi", target_os = "android"))]
pub(crate) fn init_logging() {
    use android_logger::Config;
    use log::LevelFilter;

    android_logger::init_once(
        Config::default()
            .with_max_level(LevelFilter::Debug)
            .with_tag("RunTrackerRust"),
    );
}

#[cfg(all(feature = "ffi", not(target_os = "android")))]
pub(crate) fn init_logging() {
    // No-op on non-Android platforms
}

// ============================================================================
// Core Types
// ============================================================================

/// An accepted GPS coordinate with the time it was recorded.
///
/// Immutable once recorded. Ordering across tracks is by timestamp; when
/// timestamps collide or are absent, collection order breaks the tie.
///
/// # Example
/// ```
/// use run_tracker::GeoPoint;
/// let point = GeoPoint::new(-23.5505, -46.6333, 1_700_000_000_000);
/// assert!(point.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
    /// Epoch milliseconds. `None` only for records written without one.
    #[serde(default, rename = "timestamp", skip_serializing_if = "Option::is_none")]
    pub timestamp_ms: Option<i64>,
}

impl GeoPoint {
    /// Create a new point with a timestamp.
    pub fn new(latitude: f64, longitude: f64, timestamp_ms: i64) -> Self {
        Self {
            latitude,
            longitude,
            timestamp_ms: Some(timestamp_ms),
        }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// A raw reading delivered by the device location API.
///
/// Hosts bridge "null" coordinates as NaN; such fixes are dropped by the
/// collectors rather than treated as errors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct GeoFix {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp_ms: Option<i64>,
    /// Horizontal accuracy in meters
    pub accuracy_m: Option<f64>,
    /// Ground speed in m/s
    pub speed_mps: Option<f64>,
}

impl GeoFix {
    /// Create a fix with coordinates and a timestamp only.
    pub fn new(latitude: f64, longitude: f64, timestamp_ms: i64) -> Self {
        Self {
            latitude,
            longitude,
            timestamp_ms: Some(timestamp_ms),
            accuracy_m: None,
            speed_mps: None,
        }
    }

    /// Convert to a track point, stamping it with `fallback_ms` when the
    /// device did not report a time. Returns `None` for unusable coordinates.
    pub fn to_point(&self, fallback_ms: i64) -> Option<GeoPoint> {
        let point = GeoPoint {
            latitude: self.latitude,
            longitude: self.longitude,
            timestamp_ms: Some(self.timestamp_ms.unwrap_or(fallback_ms)),
        };
        point.is_valid().then_some(point)
    }
}

/// One point of the pace-over-time series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct PaceSample {
    pub elapsed_seconds: u64,
    pub distance_km: f64,
    /// Average pace from the start of the run, minutes per km
    pub pace_min_per_km: f64,
}

/// Session phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum TrackingPhase {
    #[default]
    Idle,
    Tracking,
    Paused,
}

/// Process lifecycle state as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum AppState {
    #[default]
    Active,
    Inactive,
    Background,
}

/// Requested location accuracy, in the platform's own vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum LocationAccuracy {
    Balanced,
    High,
    BestForNavigation,
}

/// Options for a continuous location subscription.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct WatchOptions {
    pub accuracy: LocationAccuracy,
    /// Minimum time between fixes in milliseconds
    pub min_interval_ms: u64,
    /// Minimum movement between fixes in meters
    pub min_distance_m: f64,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            accuracy: LocationAccuracy::BestForNavigation,
            min_interval_ms: 2_000,
            min_distance_m: 5.0,
        }
    }
}

/// Policy constants for tracking, filtering, reconciliation and persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct TrackingConfig {
    /// Movements at or below this are GPS jitter.
    /// Default: 0.0001 km (~0.1 m)
    pub min_distance_km: f64,

    /// Movements at or above this are GPS errors.
    /// Default: 0.2 km (~200 m), generous enough for tunnel catch-up
    pub max_distance_km: f64,

    /// Decimal places used for the reconciliation dedup key.
    /// Default: 6 (~0.11 m)
    pub dedup_precision: u32,

    /// Newest points kept in the background buffer.
    /// Default: 10,000
    pub max_background_points: u32,

    /// Snapshots older than this are abandoned at restore.
    /// Default: 24 hours
    pub snapshot_max_age_ms: i64,

    /// Autosave cadence while tracking. Default: 10 s
    pub autosave_interval_ms: i64,

    /// Minimum time between pace checks. Default: 5 s
    pub pace_check_interval_ms: i64,

    /// Time since last sample that triggers a new one. Default: 5 s
    pub pace_min_interval_secs: u64,

    /// Distance since last sample that triggers a new one. Default: 0.05 km
    pub pace_min_distance_km: f64,

    /// Looser distance bound for the first sample. Default: 0.02 km
    pub pace_first_distance_km: f64,

    /// Paces at or above this are sensor artifacts. Default: 30 min/km
    pub max_pace_min_per_km: f64,

    /// Background buffer merge cadence while the UI is hidden. Default: 15 s
    pub background_sync_interval_ms: i64,

    /// One-shot polling cadence when background tasks are unavailable.
    /// Default: 30 s
    pub degraded_poll_interval_ms: i64,

    /// Timeout for polling one-shot fixes. Default: 10 s
    pub poll_fix_timeout_ms: u64,

    /// Timeout for the seeding fix requested at start. Default: 5 s
    pub initial_fix_timeout_ms: u64,

    /// Session driver tick. Default: 1 s
    pub tick_interval_ms: u64,

    /// Continuous subscription options
    pub watch: WatchOptions,

    /// Identifier of the registered background task
    pub background_task_id: String,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            min_distance_km: 0.0001,
            max_distance_km: 0.2,
            dedup_precision: 6,
            max_background_points: 10_000,
            snapshot_max_age_ms: 24 * 60 * 60 * 1000,
            autosave_interval_ms: 10_000,
            pace_check_interval_ms: 5_000,
            pace_min_interval_secs: 5,
            pace_min_distance_km: 0.05,
            pace_first_distance_km: 0.02,
            max_pace_min_per_km: 30.0,
            background_sync_interval_ms: 15_000,
            degraded_poll_interval_ms: 30_000,
            poll_fix_timeout_ms: 10_000,
            initial_fix_timeout_ms: 5_000,
            tick_interval_ms: 1_000,
            watch: WatchOptions::default(),
            background_task_id: "background-location-task".to_string(),
        }
    }
}

impl TrackingConfig {
    /// Build the point filter for these thresholds.
    pub fn filter(&self) -> PointFilter {
        PointFilter::new(self.min_distance_km, self.max_distance_km)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geo_point_validation() {
        assert!(GeoPoint::new(51.5074, -0.1278, 0).is_valid());
        assert!(!GeoPoint::new(91.0, 0.0, 0).is_valid());
        assert!(!GeoPoint::new(0.0, 181.0, 0).is_valid());
        assert!(!GeoPoint::new(f64::NAN, 0.0, 0).is_valid());
    }

    #[test]
    fn test_fix_without_timestamp_uses_fallback() {
        let fix = GeoFix {
            timestamp_ms: None,
            ..GeoFix::new(10.0, 20.0, 0)
        };
        let point = fix.to_point(42).unwrap();
        assert_eq!(point.timestamp_ms, Some(42));
    }

    #[test]
    fn test_fix_with_null_coordinates_is_dropped() {
        let fix = GeoFix::new(f64::NAN, 20.0, 5);
        assert!(fix.to_point(0).is_none());
    }

    #[test]
    fn test_point_json_shape() {
        let json = serde_json::to_string(&GeoPoint::new(1.5, 2.5, 7)).unwrap();
        assert_eq!(json, r#"{"latitude":1.5,"longitude":2.5,"timestamp":7}"#);

        let legacy: GeoPoint = serde_json::from_str(r#"{"latitude":1.5,"longitude":2.5}"#).unwrap();
        assert_eq!(legacy.timestamp_ms, None);
    }

    #[test]
    fn test_config_roundtrips_through_json() {
        let config = TrackingConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: TrackingConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
        assert_eq!(parsed.filter().max_km(), 0.2);
    }
}
