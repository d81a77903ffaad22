//! FFI bindings for mobile platforms (iOS/Android).
//!
//! The host implements two callback interfaces: [`PlatformLocation`] over its
//! native location API and [`PlatformStorage`] over its key-value store. Fixes
//! flow back in through `tracker_push_fix`, `tracker_push_one_shot` and
//! `tracker_background_locations`, addressed by the ids Rust handed out.
//!
//! One tracker lives per process. Handles are cloned out of the global before
//! any call into the session, no lock here is held across a host call, and the
//! session releases its own lock before calling the provider. A host may
//! therefore answer `start_watch` or `request_one_shot` by pushing a fix on
//! the calling thread before returning.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, info, warn};
use once_cell::sync::Lazy;

use crate::background::{BackgroundEvent, TaskRegistry};
use crate::platform::{
    FixCallback, LocationProvider, OneShotCallback, PermissionStatus, Subscription,
};
use crate::scheduler::TokioScheduler;
use crate::storage::KeyValueStore;
use crate::{
    init_logging, AppState, FinishOutcome, GeoFix, GeoPoint, LocationAccuracy, Result,
    SessionState, SystemClock, TrackingConfig, TrackingError, TrackingSession, WatchOptions,
};

// ============================================================================
// Callback Interfaces (implemented in Kotlin/Swift)
// ============================================================================

/// Native location API.
///
/// `start_watch` and `request_one_shot` must return immediately; results are
/// delivered later through `tracker_push_fix` / `tracker_push_one_shot`.
#[uniffi::export(callback_interface)]
pub trait PlatformLocation: Send + Sync {
    fn request_permission(&self) -> bool;
    fn request_background_permission(&self) -> bool;
    fn services_enabled(&self) -> bool;
    fn start_watch(&self, watch_id: u64, options: WatchOptions);
    fn stop_watch(&self, watch_id: u64);
    fn request_one_shot(&self, request_id: u64, accuracy: LocationAccuracy, timeout_ms: u64);
    fn supports_background_tasks(&self) -> bool;
    /// Returns false if the OS refused to start the task.
    fn start_background_updates(&self, task_id: String, options: WatchOptions) -> bool;
    fn stop_background_updates(&self, task_id: String) -> bool;
    fn is_background_task_running(&self, task_id: String) -> bool;
}

/// One entry of a multi-key write.
#[derive(Debug, Clone, uniffi::Record)]
pub struct KeyValueEntry {
    pub key: String,
    pub value: String,
}

/// Native durable key-value store. Writes return false on failure.
#[uniffi::export(callback_interface)]
pub trait PlatformStorage: Send + Sync {
    fn get(&self, key: String) -> Option<String>;
    fn set(&self, key: String, value: String) -> bool;
    fn remove(&self, key: String) -> bool;
    /// All entries land or none do.
    fn multi_set(&self, entries: Vec<KeyValueEntry>) -> bool;
    fn multi_remove(&self, keys: Vec<String>) -> bool;
}

// ============================================================================
// Adapters
// ============================================================================

struct HostStore {
    host: Box<dyn PlatformStorage>,
}

fn host_write(ok: bool, what: &str) -> Result<()> {
    if ok {
        Ok(())
    } else {
        Err(TrackingError::storage(format!("host rejected {}", what)))
    }
}

impl KeyValueStore for HostStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.host.get(key.to_string()))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        host_write(self.host.set(key.to_string(), value.to_string()), key)
    }

    fn remove(&self, key: &str) -> Result<()> {
        host_write(self.host.remove(key.to_string()), key)
    }

    fn multi_set(&self, entries: &[(&str, String)]) -> Result<()> {
        let entries = entries
            .iter()
            .map(|(key, value)| KeyValueEntry {
                key: (*key).to_string(),
                value: value.clone(),
            })
            .collect();
        host_write(self.host.multi_set(entries), "multi-key write")
    }

    fn multi_remove(&self, keys: &[&str]) -> Result<()> {
        let keys = keys.iter().map(|k| (*k).to_string()).collect();
        host_write(self.host.multi_remove(keys), "multi-key remove")
    }
}

#[derive(Default)]
struct PendingCallbacks {
    watchers: HashMap<u64, FixCallback>,
    one_shots: HashMap<u64, OneShotCallback>,
}

/// [`LocationProvider`] over the host's callback interface.
struct HostLocationProvider {
    host: Arc<dyn PlatformLocation>,
    pending: Arc<Mutex<PendingCallbacks>>,
    next_id: AtomicU64,
}

impl HostLocationProvider {
    fn new(host: Box<dyn PlatformLocation>) -> Self {
        Self {
            host: Arc::from(host),
            pending: Arc::new(Mutex::new(PendingCallbacks::default())),
            next_id: AtomicU64::new(1),
        }
    }

    fn pending(&self) -> MutexGuard<'_, PendingCallbacks> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn push_fix(&self, watch_id: u64, fix: GeoFix) {
        let callback = self.pending().watchers.get(&watch_id).cloned();
        match callback {
            Some(callback) => callback(fix),
            None => debug!("[RunTrackerRust] fix for stopped watch {}", watch_id),
        }
    }

    fn push_one_shot(&self, request_id: u64, fix: Option<GeoFix>) {
        let callback = self.pending().one_shots.remove(&request_id);
        match callback {
            Some(callback) => callback(fix),
            None => debug!("[RunTrackerRust] unknown one-shot request {}", request_id),
        }
    }
}

fn permission(granted: bool) -> PermissionStatus {
    if granted {
        PermissionStatus::Granted
    } else {
        PermissionStatus::Denied
    }
}

struct HostSubscription {
    watch_id: u64,
    host: Arc<dyn PlatformLocation>,
    pending: Arc<Mutex<PendingCallbacks>>,
}

impl Subscription for HostSubscription {
    fn cancel(self: Box<Self>) {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .watchers
            .remove(&self.watch_id);
        self.host.stop_watch(self.watch_id);
    }
}

impl LocationProvider for HostLocationProvider {
    fn request_permission(&self) -> PermissionStatus {
        permission(self.host.request_permission())
    }

    fn request_background_permission(&self) -> PermissionStatus {
        permission(self.host.request_background_permission())
    }

    fn services_enabled(&self) -> bool {
        self.host.services_enabled()
    }

    fn request_current_fix(
        &self,
        accuracy: LocationAccuracy,
        timeout_ms: u64,
        on_result: OneShotCallback,
    ) {
        let request_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.pending().one_shots.insert(request_id, on_result);
        self.host.request_one_shot(request_id, accuracy, timeout_ms);
    }

    fn subscribe(
        &self,
        options: &WatchOptions,
        on_fix: FixCallback,
    ) -> Result<Box<dyn Subscription>> {
        let watch_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.pending().watchers.insert(watch_id, on_fix);
        self.host.start_watch(watch_id, *options);
        Ok(Box::new(HostSubscription {
            watch_id,
            host: self.host.clone(),
            pending: self.pending.clone(),
        }))
    }

    fn supports_background_tasks(&self) -> bool {
        self.host.supports_background_tasks()
    }

    fn start_background_updates(&self, task_id: &str, options: &WatchOptions) -> Result<()> {
        if self.host.start_background_updates(task_id.to_string(), *options) {
            Ok(())
        } else {
            Err(TrackingError::BackgroundTaskUnavailable {
                message: format!("host refused to start '{}'", task_id),
            })
        }
    }

    fn stop_background_updates(&self, task_id: &str) -> Result<()> {
        if self.host.stop_background_updates(task_id.to_string()) {
            Ok(())
        } else {
            Err(TrackingError::BackgroundTaskUnavailable {
                message: format!("'{}' was not running", task_id),
            })
        }
    }

    fn is_background_task_running(&self, task_id: &str) -> bool {
        self.host.is_background_task_running(task_id.to_string())
    }
}

// ============================================================================
// Global Tracker
// ============================================================================

struct Tracker {
    session: TrackingSession,
    provider: Arc<HostLocationProvider>,
    registry: Arc<TaskRegistry>,
    /// Drives the session ticker
    runtime: tokio::runtime::Runtime,
}

static TRACKER: Lazy<Mutex<Option<Tracker>>> = Lazy::new(|| Mutex::new(None));

struct TrackerHandles {
    session: TrackingSession,
    provider: Arc<HostLocationProvider>,
    registry: Arc<TaskRegistry>,
}

fn handles() -> Result<TrackerHandles> {
    let guard = TRACKER.lock().unwrap_or_else(|e| e.into_inner());
    guard
        .as_ref()
        .map(|t| TrackerHandles {
            session: t.session.clone(),
            provider: t.provider.clone(),
            registry: t.registry.clone(),
        })
        .ok_or(TrackingError::NotInitialized)
}

/// Default policy constants.
#[uniffi::export]
pub fn default_tracking_config() -> TrackingConfig {
    TrackingConfig::default()
}

/// Create the process-wide tracker and register the background task.
///
/// Calling it again replaces the previous tracker.
#[uniffi::export]
pub fn tracker_init(
    location: Box<dyn PlatformLocation>,
    storage: Box<dyn PlatformStorage>,
    config: TrackingConfig,
) -> Result<()> {
    init_logging();
    info!("[RunTrackerRust] tracker_init (task '{}')", config.background_task_id);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("run-tracker")
        .enable_time()
        .build()
        .map_err(|e| TrackingError::Scheduler {
            message: e.to_string(),
        })?;

    let provider = Arc::new(HostLocationProvider::new(location));
    let registry = Arc::new(TaskRegistry::new());
    let session = TrackingSession::new(
        provider.clone(),
        Arc::new(HostStore { host: storage }),
        Arc::new(SystemClock),
        Arc::new(TokioScheduler::new(runtime.handle().clone())),
        config,
    );
    session.register_background_task(&registry);

    let previous = TRACKER
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .replace(Tracker {
            session,
            provider,
            registry,
            runtime,
        });
    if let Some(previous) = previous {
        warn!("[RunTrackerRust] replacing existing tracker");
        // Never block the caller on the old ticker
        previous.runtime.shutdown_background();
    }
    Ok(())
}

#[uniffi::export]
pub fn tracker_restore() -> Result<bool> {
    handles()?.session.restore()
}

#[uniffi::export]
pub fn tracker_start() -> Result<()> {
    handles()?.session.start()
}

#[uniffi::export]
pub fn tracker_pause() -> Result<()> {
    handles()?.session.pause()
}

#[uniffi::export]
pub fn tracker_reset() -> Result<()> {
    handles()?.session.reset();
    Ok(())
}

#[uniffi::export]
pub fn tracker_finish() -> Result<FinishOutcome> {
    let outcome = handles()?.session.finish()?;
    info!(
        "[RunTrackerRust] finished run {} ({} m)",
        outcome.run().id,
        outcome.run().distance_meters
    );
    Ok(outcome)
}

#[uniffi::export]
pub fn tracker_state() -> Result<SessionState> {
    Ok(handles()?.session.state())
}

#[uniffi::export]
pub fn tracker_all_points() -> Result<Vec<GeoPoint>> {
    Ok(handles()?.session.get_all_points())
}

#[uniffi::export]
pub fn tracker_app_state_changed(state: AppState) -> Result<()> {
    handles()?.session.on_app_state_changed(state);
    Ok(())
}

/// Deliver a continuous-watch fix.
#[uniffi::export]
pub fn tracker_push_fix(watch_id: u64, fix: GeoFix) -> Result<()> {
    handles()?.provider.push_fix(watch_id, fix);
    Ok(())
}

/// Answer a one-shot request; `None` on timeout or failure.
#[uniffi::export]
pub fn tracker_push_one_shot(request_id: u64, fix: Option<GeoFix>) -> Result<()> {
    handles()?.provider.push_one_shot(request_id, fix);
    Ok(())
}

/// Deliver a batch from the OS background task.
#[uniffi::export]
pub fn tracker_background_locations(task_id: String, fixes: Vec<GeoFix>) -> Result<()> {
    debug!(
        "[RunTrackerRust] {} background fixes for '{}'",
        fixes.len(),
        task_id
    );
    handles()?
        .registry
        .dispatch(&task_id, BackgroundEvent::Locations(fixes))
}

/// Report a background task failure from the OS.
#[uniffi::export]
pub fn tracker_background_error(task_id: String, message: String) -> Result<()> {
    handles()?
        .registry
        .dispatch(&task_id, BackgroundEvent::Error(message))
}
