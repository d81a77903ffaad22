//! # Background Collection
//!
//! The background collector runs in an OS-managed context that may outlive,
//! or start before, the main process. It shares no memory with the session:
//! everything it learns goes into the durable buffer, and the reconciler is
//! the only reader.
//!
//! ## Task registration
//!
//! Handlers are registered on an explicit [`TaskRegistry`] built at startup
//! with its dependencies injected, instead of a global defined as a side
//! effect of loading a module. The platform bridge dispatches OS deliveries
//! to the registry by task id.
//!
//! ## Durability
//!
//! Each accepted batch ends in one atomic multi-key write of the (capped)
//! point list, the last point and the running distance. A failed write is
//! logged and swallowed; the accepted points stay in the collector's own
//! memory and go out with the next successful write.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, error, trace, warn};

use crate::accumulator::DistanceAccumulator;
use crate::filter::PointFilter;
use crate::platform::Clock;
use crate::storage::{keys, KeyValueStore};
use crate::{GeoFix, GeoPoint, Result, TrackingConfig, TrackingError};

// ============================================================================
// Buffer (durable mailbox)
// ============================================================================

/// Everything the background collector has persisted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BufferContents {
    pub points: Vec<GeoPoint>,
    pub last_point: Option<GeoPoint>,
    pub distance_km: f64,
    pub run_id: Option<String>,
}

/// Typed access to the background collector's storage keys.
#[derive(Clone)]
pub struct BackgroundBuffer {
    store: Arc<dyn KeyValueStore>,
}

impl BackgroundBuffer {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn read_points(&self) -> Result<Vec<GeoPoint>> {
        match self.store.get(keys::BACKGROUND_POINTS)? {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(Vec::new()),
        }
    }

    pub fn read_last_point(&self) -> Result<Option<GeoPoint>> {
        match self.store.get(keys::BACKGROUND_LAST_POINT)? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub fn read_distance(&self) -> Result<f64> {
        match self.store.get(keys::BACKGROUND_DISTANCE)? {
            Some(raw) => raw
                .trim()
                .parse::<f64>()
                .map_err(|e| TrackingError::Serialization {
                    message: format!("background distance '{}': {}", raw, e),
                }),
            None => Ok(0.0),
        }
    }

    pub fn read_run_id(&self) -> Result<Option<String>> {
        self.store.get(keys::BACKGROUND_RUN_ID)
    }

    pub fn read(&self) -> Result<BufferContents> {
        Ok(BufferContents {
            points: self.read_points()?,
            last_point: self.read_last_point()?,
            distance_km: self.read_distance()?,
            run_id: self.read_run_id()?,
        })
    }

    /// Replace points, last point and distance in one atomic write.
    pub fn write(
        &self,
        points: &[GeoPoint],
        last_point: Option<&GeoPoint>,
        distance_km: f64,
    ) -> Result<()> {
        let mut entries = vec![
            (keys::BACKGROUND_POINTS, serde_json::to_string(points)?),
            (keys::BACKGROUND_DISTANCE, distance_km.to_string()),
        ];
        if let Some(last) = last_point {
            entries.push((keys::BACKGROUND_LAST_POINT, serde_json::to_string(last)?));
        }
        self.store.multi_set(&entries)
    }

    /// Empty the buffer and tag it with a new run.
    pub fn begin_run(&self, run_id: &str) -> Result<()> {
        self.store.remove(keys::BACKGROUND_LAST_POINT)?;
        self.store.multi_set(&[
            (keys::BACKGROUND_POINTS, "[]".to_string()),
            (keys::BACKGROUND_DISTANCE, "0".to_string()),
            (keys::BACKGROUND_RUN_ID, run_id.to_string()),
        ])
    }

    pub fn clear(&self) -> Result<()> {
        self.store.multi_remove(&keys::BACKGROUND_KEYS)
    }
}

// ============================================================================
// Task Registry
// ============================================================================

/// What the OS hands a background location task.
#[derive(Debug, Clone, PartialEq)]
pub enum BackgroundEvent {
    Locations(Vec<GeoFix>),
    Error(String),
}

pub trait BackgroundTaskHandler: Send + Sync {
    fn handle(&self, event: BackgroundEvent);
}

/// Explicit task-id to handler registry.
#[derive(Default)]
pub struct TaskRegistry {
    handlers: Mutex<HashMap<String, Arc<dyn BackgroundTaskHandler>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<dyn BackgroundTaskHandler>>> {
        self.handlers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register (or replace) the handler for `task_id`.
    pub fn register(&self, task_id: &str, handler: Arc<dyn BackgroundTaskHandler>) {
        if self.lock().insert(task_id.to_string(), handler).is_some() {
            debug!("[TaskRegistry] replaced handler for '{}'", task_id);
        }
    }

    pub fn is_registered(&self, task_id: &str) -> bool {
        self.lock().contains_key(task_id)
    }

    /// Route an OS delivery to its handler.
    pub fn dispatch(&self, task_id: &str, event: BackgroundEvent) -> Result<()> {
        let handler = self.lock().get(task_id).cloned();
        match handler {
            Some(handler) => {
                handler.handle(event);
                Ok(())
            }
            None => Err(TrackingError::BackgroundTaskUnavailable {
                message: format!("no handler registered for '{}'", task_id),
            }),
        }
    }
}

// ============================================================================
// Collector
// ============================================================================

/// Result of processing one delivered batch.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BatchOutcome {
    pub accepted: usize,
    pub rejected: usize,
    pub persisted: bool,
}

struct CachedRun {
    run_id: Option<String>,
    accumulator: DistanceAccumulator,
    unsaved: bool,
}

/// Filter/accumulator pair that persists every accepted batch.
pub struct BackgroundCollector {
    buffer: BackgroundBuffer,
    filter: PointFilter,
    max_points: usize,
    clock: Arc<dyn Clock>,
    cache: Mutex<Option<CachedRun>>,
}

impl BackgroundCollector {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        config: &TrackingConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            buffer: BackgroundBuffer::new(store),
            filter: config.filter(),
            max_points: config.max_background_points as usize,
            clock,
            cache: Mutex::new(None),
        }
    }

    /// Build the collector and register it under the configured task id.
    pub fn register(
        registry: &TaskRegistry,
        store: Arc<dyn KeyValueStore>,
        config: &TrackingConfig,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let collector = Arc::new(Self::new(store, config, clock));
        registry.register(&config.background_task_id, collector.clone());
        collector
    }

    /// Filter a batch in delivery order and persist what was accepted.
    ///
    /// A failed read skips the whole batch, so the buffer is never replaced
    /// by a partial view of itself.
    pub fn handle_fixes(&self, fixes: &[GeoFix]) -> Result<BatchOutcome> {
        let mut guard = self.cache.lock().unwrap_or_else(|e| e.into_inner());

        let stored_run = self.buffer.read_run_id()?;
        let stale = match guard.as_ref() {
            Some(cached) => cached.run_id != stored_run,
            None => true,
        };
        if stale {
            let contents = self.buffer.read()?;
            debug!(
                "[BackgroundCollector] loaded {} points ({:.3} km) for run {:?}",
                contents.points.len(),
                contents.distance_km,
                contents.run_id
            );
            *guard = Some(CachedRun {
                run_id: stored_run,
                accumulator: DistanceAccumulator::restore(
                    self.filter,
                    contents.points,
                    contents.distance_km,
                    contents.last_point,
                ),
                unsaved: false,
            });
        }
        let Some(cached) = guard.as_mut() else {
            return Ok(BatchOutcome::default());
        };

        let mut outcome = BatchOutcome::default();
        let now = self.clock.now_ms();
        for fix in fixes {
            let Some(point) = fix.to_point(now) else {
                trace!("[BackgroundCollector] fix without coordinates dropped");
                continue;
            };
            if cached.accumulator.offer(point).was_accepted {
                outcome.accepted += 1;
            } else {
                outcome.rejected += 1;
            }
        }

        if outcome.accepted == 0 && !cached.unsaved {
            return Ok(outcome);
        }

        cached.accumulator.truncate_front(self.max_points);
        let acc = &cached.accumulator;
        match self
            .buffer
            .write(acc.points(), acc.last_accepted(), acc.total_km())
        {
            Ok(()) => {
                cached.unsaved = false;
                outcome.persisted = true;
            }
            Err(e) => {
                cached.unsaved = true;
                error!("[BackgroundCollector] save failed, retrying on next fix: {}", e);
            }
        }
        Ok(outcome)
    }
}

impl BackgroundTaskHandler for BackgroundCollector {
    fn handle(&self, event: BackgroundEvent) {
        match event {
            BackgroundEvent::Locations(fixes) if fixes.is_empty() => {
                trace!("[BackgroundCollector] empty delivery");
            }
            BackgroundEvent::Locations(fixes) => {
                if let Err(e) = self.handle_fixes(&fixes) {
                    error!("[BackgroundCollector] batch skipped: {}", e);
                }
            }
            BackgroundEvent::Error(message) => {
                warn!("[BackgroundCollector] platform error: {}", message);
            }
        }
    }
}
