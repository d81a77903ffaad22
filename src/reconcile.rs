//! # Reconciler
//!
//! Merges the background collector's persisted track into the foreground
//! track. This is the only place the two streams meet.
//!
//! ## Algorithm
//!
//! 1. Key every foreground point by its rounded `(lat, lng)`.
//! 2. When the background list is longer, its trailing
//!    `background.len() - foreground.len()` points are the first candidates;
//!    the whole list is then scanned for anything else the foreground lacks.
//!    Otherwise only the full scan runs.
//! 3. Candidates already present in the foreground, or repeated among
//!    themselves, are dropped.
//! 4. The survivors are sorted by timestamp, ties and missing timestamps
//!    falling back to background order, and appended.
//! 5. Distance becomes `max(foreground, background)`. The totals are never
//!    summed.
//!
//! Reconciling the same buffer twice adds nothing the second time.

use std::collections::HashSet;

use log::{debug, info, warn};

use crate::accumulator::DistanceAccumulator;
use crate::background::BackgroundBuffer;
use crate::geo_utils::coordinate_key;
use crate::{GeoPoint, Result};

/// What a reconcile pass changed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconcileReport {
    /// Points appended to the foreground track
    pub added: usize,
    pub distance_before_km: f64,
    pub distance_after_km: f64,
}

impl ReconcileReport {
    pub fn changed(&self) -> bool {
        self.added > 0 || self.distance_after_km != self.distance_before_km
    }
}

/// Background points missing from `foreground`, in merge order.
pub fn missing_points(
    foreground: &[GeoPoint],
    background: &[GeoPoint],
    precision: u32,
) -> Vec<GeoPoint> {
    let mut seen: HashSet<(i64, i64)> = foreground
        .iter()
        .map(|p| coordinate_key(p, precision))
        .collect();

    // (effective timestamp, background index, point)
    let mut picked: Vec<(i64, usize, GeoPoint)> = Vec::new();
    let effective = effective_timestamps(background);

    let mut take = |index: usize, seen: &mut HashSet<(i64, i64)>| {
        let point = background[index];
        if seen.insert(coordinate_key(&point, precision)) {
            picked.push((effective[index], index, point));
        }
    };

    if background.len() > foreground.len() {
        for index in foreground.len()..background.len() {
            take(index, &mut seen);
        }
    }
    for index in 0..background.len() {
        take(index, &mut seen);
    }

    picked.sort_by_key(|&(ts, index, _)| (ts, index));
    picked.into_iter().map(|(_, _, point)| point).collect()
}

/// Timestamps with gaps filled from the previous point, so points without
/// one keep their background position relative to their neighbours.
fn effective_timestamps(points: &[GeoPoint]) -> Vec<i64> {
    let mut last = i64::MIN;
    points
        .iter()
        .map(|p| {
            if let Some(ts) = p.timestamp_ms {
                last = ts;
            }
            last
        })
        .collect()
}

/// Merge a background snapshot into `foreground`.
pub fn reconcile(
    foreground: &mut DistanceAccumulator,
    background_points: &[GeoPoint],
    background_distance_km: f64,
    precision: u32,
) -> ReconcileReport {
    let distance_before_km = foreground.total_km();
    let new_points = missing_points(foreground.points(), background_points, precision);
    let added = new_points.len();

    if added > 0 || background_distance_km > distance_before_km {
        foreground.apply_merge(new_points, background_distance_km);
    }

    let report = ReconcileReport {
        added,
        distance_before_km,
        distance_after_km: foreground.total_km(),
    };
    if report.changed() {
        info!(
            "[Reconciler] merged {} background points, distance {:.4} -> {:.4} km",
            added, distance_before_km, report.distance_after_km
        );
    } else {
        debug!(
            "[Reconciler] nothing to merge ({} background points)",
            background_points.len()
        );
    }
    report
}

/// Read the background buffer and merge it into `foreground`.
///
/// A failed read leaves the foreground untouched. When `run_id` is set, a
/// buffer tagged with any other run (or with none) is left unmerged.
pub fn reconcile_from_buffer(
    foreground: &mut DistanceAccumulator,
    buffer: &BackgroundBuffer,
    run_id: Option<&str>,
    precision: u32,
) -> Result<ReconcileReport> {
    let contents = buffer.read()?;
    if let Some(expected) = run_id {
        if contents.run_id.as_deref() != Some(expected) {
            warn!(
                "[Reconciler] buffer belongs to run {:?}, not {}; skipping merge",
                contents.run_id, expected
            );
            let km = foreground.total_km();
            return Ok(ReconcileReport {
                added: 0,
                distance_before_km: km,
                distance_after_km: km,
            });
        }
    }
    Ok(reconcile(
        foreground,
        &contents.points,
        contents.distance_km,
        precision,
    ))
}
