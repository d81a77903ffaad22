//! Platform seams: wall clock, location provider, background capability.
//!
//! The device location API is an external collaborator. The session only sees
//! it through [`LocationProvider`]; hosts implement it over their native API,
//! and [`ReplayLocationProvider`] drives scripted fixes for emulator runs and
//! tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use log::{debug, warn};

use crate::background::{BackgroundEvent, TaskRegistry};
use crate::{GeoFix, LocationAccuracy, Result, TrackingError, WatchOptions};

// ============================================================================
// Clock
// ============================================================================

/// Source of wall-clock time in epoch milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// System wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Settable clock for deterministic replay and tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(start_ms),
        }
    }

    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: i64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Location Provider
// ============================================================================

/// Permission state reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied,
}

impl PermissionStatus {
    pub fn is_granted(self) -> bool {
        self == PermissionStatus::Granted
    }
}

/// Callback invoked for every fix of a continuous subscription.
pub type FixCallback = Arc<dyn Fn(GeoFix) + Send + Sync>;

/// Callback invoked once for a one-shot request; `None` on timeout or failure.
pub type OneShotCallback = Box<dyn FnOnce(Option<GeoFix>) + Send>;

/// Handle to a continuous location subscription.
pub trait Subscription: Send {
    /// Stop delivery. No fix is delivered to the callback after this returns.
    fn cancel(self: Box<Self>);
}

/// Device location API.
///
/// Callbacks may run on any thread, including synchronously from inside
/// `subscribe` or `request_current_fix` before they return.
pub trait LocationProvider: Send + Sync {
    fn request_permission(&self) -> PermissionStatus;

    /// Background ("always") permission. Platforms without the concept deny.
    fn request_background_permission(&self) -> PermissionStatus {
        PermissionStatus::Denied
    }

    fn services_enabled(&self) -> bool;

    /// Fire-and-forget one-shot position request bounded by `timeout_ms`.
    fn request_current_fix(
        &self,
        accuracy: LocationAccuracy,
        timeout_ms: u64,
        on_result: OneShotCallback,
    );

    fn subscribe(&self, options: &WatchOptions, on_fix: FixCallback)
        -> Result<Box<dyn Subscription>>;

    /// Capability probe: can this platform run the background task variant?
    fn supports_background_tasks(&self) -> bool;

    fn start_background_updates(&self, task_id: &str, options: &WatchOptions) -> Result<()>;

    fn stop_background_updates(&self, task_id: &str) -> Result<()>;

    fn is_background_task_running(&self, task_id: &str) -> bool;
}

/// How location is collected while the UI is hidden.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackgroundStrategy {
    /// OS-managed background task writing to the durable buffer.
    Task,
    /// Degraded: periodic one-shot polling from the foreground context.
    Polling,
}

/// Pick the background strategy from the capability probe.
pub fn select_background_strategy(
    supports_tasks: bool,
    background_permission: PermissionStatus,
) -> BackgroundStrategy {
    if supports_tasks && background_permission.is_granted() {
        BackgroundStrategy::Task
    } else {
        BackgroundStrategy::Polling
    }
}

// ============================================================================
// Replay Provider
// ============================================================================

struct ReplayState {
    permission: PermissionStatus,
    background_permission: PermissionStatus,
    services_enabled: bool,
    supports_background: bool,
    background_start_fails: bool,
    next_watch_id: u64,
    watchers: HashMap<u64, FixCallback>,
    one_shots: Vec<OneShotCallback>,
    one_shot_requests: usize,
    background_tasks: HashSet<String>,
}

/// In-process location provider that replays scripted fixes.
///
/// Continuous fixes go to every live subscription via [`emit`](Self::emit);
/// pending one-shot requests are answered by
/// [`resolve_one_shots`](Self::resolve_one_shots); background batches are
/// dispatched through the [`TaskRegistry`] to whatever handler is registered.
pub struct ReplayLocationProvider {
    state: Arc<Mutex<ReplayState>>,
    registry: Option<Arc<TaskRegistry>>,
}

impl Default for ReplayLocationProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplayLocationProvider {
    /// Permissions granted, services on, background tasks supported.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ReplayState {
                permission: PermissionStatus::Granted,
                background_permission: PermissionStatus::Granted,
                services_enabled: true,
                supports_background: true,
                background_start_fails: false,
                next_watch_id: 1,
                watchers: HashMap::new(),
                one_shots: Vec::new(),
                one_shot_requests: 0,
                background_tasks: HashSet::new(),
            })),
            registry: None,
        }
    }

    pub fn with_task_registry(mut self, registry: Arc<TaskRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    fn lock(&self) -> MutexGuard<'_, ReplayState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_permission(&self, status: PermissionStatus) {
        self.lock().permission = status;
    }

    pub fn set_background_permission(&self, status: PermissionStatus) {
        self.lock().background_permission = status;
    }

    pub fn set_services_enabled(&self, enabled: bool) {
        self.lock().services_enabled = enabled;
    }

    pub fn set_background_supported(&self, supported: bool) {
        self.lock().supports_background = supported;
    }

    /// Make the next `start_background_updates` calls fail.
    pub fn set_background_start_fails(&self, fails: bool) {
        self.lock().background_start_fails = fails;
    }

    /// Deliver a fix to every live subscription.
    pub fn emit(&self, fix: GeoFix) {
        let callbacks: Vec<FixCallback> = self.lock().watchers.values().cloned().collect();
        for callback in callbacks {
            callback(fix);
        }
    }

    /// Answer every pending one-shot request.
    pub fn resolve_one_shots(&self, fix: Option<GeoFix>) {
        let pending = std::mem::take(&mut self.lock().one_shots);
        for callback in pending {
            callback(fix);
        }
    }

    /// Deliver a batch to every running background task.
    ///
    /// Batches for stopped tasks are dropped, as the OS would.
    pub fn deliver_background(&self, fixes: Vec<GeoFix>) -> Result<()> {
        let tasks: Vec<String> = self.lock().background_tasks.iter().cloned().collect();
        let Some(registry) = &self.registry else {
            return Ok(());
        };
        for task_id in tasks {
            registry.dispatch(&task_id, BackgroundEvent::Locations(fixes.clone()))?;
        }
        Ok(())
    }

    pub fn active_subscriptions(&self) -> usize {
        self.lock().watchers.len()
    }

    pub fn pending_one_shots(&self) -> usize {
        self.lock().one_shots.len()
    }

    /// Total one-shot requests issued so far.
    pub fn one_shot_requests(&self) -> usize {
        self.lock().one_shot_requests
    }
}

struct ReplaySubscription {
    id: u64,
    state: Weak<Mutex<ReplayState>>,
}

impl Subscription for ReplaySubscription {
    fn cancel(self: Box<Self>) {
        if let Some(state) = self.state.upgrade() {
            let mut guard = state.lock().unwrap_or_else(|e| e.into_inner());
            guard.watchers.remove(&self.id);
            debug!("[ReplayProvider] subscription {} cancelled", self.id);
        }
    }
}

impl LocationProvider for ReplayLocationProvider {
    fn request_permission(&self) -> PermissionStatus {
        self.lock().permission
    }

    fn request_background_permission(&self) -> PermissionStatus {
        self.lock().background_permission
    }

    fn services_enabled(&self) -> bool {
        self.lock().services_enabled
    }

    fn request_current_fix(
        &self,
        _accuracy: LocationAccuracy,
        _timeout_ms: u64,
        on_result: OneShotCallback,
    ) {
        let mut guard = self.lock();
        guard.one_shot_requests += 1;
        guard.one_shots.push(on_result);
    }

    fn subscribe(
        &self,
        _options: &WatchOptions,
        on_fix: FixCallback,
    ) -> Result<Box<dyn Subscription>> {
        let mut guard = self.lock();
        let id = guard.next_watch_id;
        guard.next_watch_id += 1;
        guard.watchers.insert(id, on_fix);
        Ok(Box::new(ReplaySubscription {
            id,
            state: Arc::downgrade(&self.state),
        }))
    }

    fn supports_background_tasks(&self) -> bool {
        self.lock().supports_background
    }

    fn start_background_updates(&self, task_id: &str, _options: &WatchOptions) -> Result<()> {
        let mut guard = self.lock();
        if !guard.supports_background || guard.background_start_fails {
            warn!("[ReplayProvider] refusing background task '{}'", task_id);
            return Err(TrackingError::BackgroundTaskUnavailable {
                message: format!("task '{}' cannot be started", task_id),
            });
        }
        guard.background_tasks.insert(task_id.to_string());
        Ok(())
    }

    fn stop_background_updates(&self, task_id: &str) -> Result<()> {
        if self.lock().background_tasks.remove(task_id) {
            Ok(())
        } else {
            Err(TrackingError::BackgroundTaskUnavailable {
                message: format!("task '{}' is not registered", task_id),
            })
        }
    }

    fn is_background_task_running(&self, task_id: &str) -> bool {
        self.lock().background_tasks.contains(task_id)
    }
}
