//! Reconciliation properties: idempotence, completeness, take-max distance,
//! and convergence under different foreground/background interleavings.
//!
//! Run with: `cargo test --test reconcile_properties`

use std::collections::HashSet;
use std::sync::Arc;

use run_tracker::geo_utils::coordinate_key;
use run_tracker::reconcile::{missing_points, reconcile_from_buffer};
use run_tracker::{
    reconcile, BackgroundBuffer, BackgroundCollector, DistanceAccumulator, GeoFix, GeoPoint,
    KeyValueStore, ManualClock, MemoryStore, PointFilter, TrackingConfig,
};

/// A straight run east along the equator, one point every ~27.8 m.
fn path(n: usize) -> Vec<GeoPoint> {
    (0..n)
        .map(|i| GeoPoint::new(0.0, i as f64 * 0.00025, 1_000 * i as i64))
        .collect()
}

fn track(points: &[GeoPoint], km: f64) -> DistanceAccumulator {
    DistanceAccumulator::restore(PointFilter::default(), points.to_vec(), km, None)
}

fn assert_sorted_unique(points: &[GeoPoint]) {
    let keys: HashSet<_> = points.iter().map(|p| coordinate_key(p, 6)).collect();
    assert_eq!(keys.len(), points.len(), "duplicate points in merged track");
    assert!(
        points.windows(2).all(|w| w[0].timestamp_ms <= w[1].timestamp_ms),
        "merged track out of order"
    );
}

// ============================================================================
// Idempotence
// ============================================================================

#[test]
fn test_empty_background_changes_nothing() {
    for n in [0, 1, 5, 40] {
        let points = path(n);
        let km = 0.0278 * n as f64;
        let mut fg = track(&points, km);

        let report = reconcile(&mut fg, &[], 0.0, 6);
        assert!(!report.changed());
        assert_eq!(fg.points(), points.as_slice());
        assert_eq!(fg.total_km(), km);
    }
}

#[test]
fn test_repeat_reconcile_is_stable() {
    let full = path(20);
    let mut fg = track(&full[..7], 0.17);
    reconcile(&mut fg, &full, 0.53, 6);
    let once = fg.points().to_vec();

    for _ in 0..3 {
        let report = reconcile(&mut fg, &full, 0.53, 6);
        assert_eq!(report.added, 0);
    }
    assert_eq!(fg.points(), once.as_slice());
}

// ============================================================================
// Completeness
// ============================================================================

#[test]
fn test_prefix_foreground_recovers_every_background_point() {
    let full = path(12);
    for n in 0..=full.len() {
        let mut fg = track(&full[..n], 0.0);
        reconcile(&mut fg, &full, 0.0, 6);
        assert_eq!(fg.points(), full.as_slice(), "prefix of {}", n);
        assert_eq!(fg.last_accepted(), full.last());
    }
}

#[test]
fn test_background_keys_match_after_serialization() {
    let full = path(10);
    let json = serde_json::to_string(&full).unwrap();
    let round_tripped: Vec<GeoPoint> = serde_json::from_str(&json).unwrap();

    let mut fg = track(&full[..4], 0.0);
    reconcile(&mut fg, &round_tripped, 0.0, 6);
    assert_eq!(fg.points().len(), 10);
    assert_sorted_unique(fg.points());
}

#[test]
fn test_scrambled_background_is_appended_in_time_order() {
    let full = path(8);
    let scrambled = vec![full[0], full[1], full[6], full[3], full[7], full[2], full[5], full[4]];

    let mut fg = track(&full[..2], 0.0);
    reconcile(&mut fg, &scrambled, 0.0, 6);
    assert_eq!(fg.points(), full.as_slice());
}

#[test]
fn test_suffix_and_full_scan_agree() {
    // background is longer, but one of its early points is new too
    let full = path(6);
    let extra = GeoPoint::new(0.0001, 0.000125, 500);
    let foreground = vec![full[0], full[1], full[2]];
    let background = vec![full[0], extra, full[2], full[3], full[4], full[5]];

    let merged = missing_points(&foreground, &background, 6);
    assert_eq!(merged, vec![extra, full[3], full[4], full[5]]);
}

// ============================================================================
// Distance
// ============================================================================

#[test]
fn test_distance_takes_max_never_sum() {
    let full = path(4);

    let mut fg = track(&full, 0.40);
    reconcile(&mut fg, &full, 0.25, 6);
    assert_eq!(fg.total_km(), 0.40);

    reconcile(&mut fg, &full, 0.55, 6);
    assert_eq!(fg.total_km(), 0.55);

    // a reset background collector never lowers the total
    reconcile(&mut fg, &[], 0.0, 6);
    assert_eq!(fg.total_km(), 0.55);
}

#[test]
fn test_two_point_foreground_four_point_background() {
    let p = path(4);
    let mut fg = track(&p[..2], 0.18);

    reconcile(&mut fg, &p, 0.30, 6);
    assert_eq!(fg.points(), &[p[0], p[1], p[2], p[3]]);
    assert_eq!(fg.total_km(), 0.30);
}

// ============================================================================
// Interleavings through real collectors
// ============================================================================

/// Split one ground-truth run between the two collectors according to
/// `visible`, reconciling whenever the app comes back to the foreground.
fn run_interleaving(visible: &[bool]) -> (DistanceAccumulator, BackgroundBuffer) {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let config = TrackingConfig::default();
    let clock = Arc::new(ManualClock::new(0));
    let collector = BackgroundCollector::new(store.clone(), &config, clock);
    let buffer = BackgroundBuffer::new(store);
    buffer.begin_run("run").unwrap();

    let mut fg = DistanceAccumulator::new(config.filter());
    let truth = path(visible.len());
    let mut was_visible = true;

    for (point, &is_visible) in truth.iter().zip(visible) {
        let fix = GeoFix::new(point.latitude, point.longitude, point.timestamp_ms.unwrap_or(0));
        // the background task sees every fix; the UI only while visible
        collector.handle_fixes(&[fix]).unwrap();
        if is_visible {
            if !was_visible {
                reconcile_from_buffer(&mut fg, &buffer, Some("run"), config.dedup_precision)
                    .unwrap();
            }
            fg.offer(*point);
        }
        was_visible = is_visible;
    }
    reconcile_from_buffer(&mut fg, &buffer, Some("run"), config.dedup_precision).unwrap();
    (fg, buffer)
}

#[test]
fn test_interleavings_converge_to_full_track() {
    let patterns: Vec<Vec<bool>> = vec![
        vec![true; 10],
        vec![false; 10],
        vec![true, true, false, false, false, true, true, true, false, true],
        vec![false, true, false, true, false, true, false, true, false, true],
        vec![true, false, false, false, false, false, false, false, false, false],
        (0..30).map(|i| (i / 4) % 2 == 0).collect(),
    ];

    for visible in patterns {
        let (fg, buffer) = run_interleaving(&visible);
        let truth = path(visible.len());

        assert_eq!(fg.points(), truth.as_slice(), "pattern {:?}", visible);
        assert_sorted_unique(fg.points());

        let background_km = buffer.read_distance().unwrap();
        assert!(fg.total_km() >= background_km);
        // one collector saw everything, so the total is the full path length
        let expected = run_tracker::geo_utils::polyline_length_km(&truth);
        assert!((fg.total_km() - expected).abs() < 1e-9, "pattern {:?}", visible);
    }
}
