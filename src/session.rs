//! # Tracking Session
//!
//! The Idle/Tracking/Paused state machine that owns the foreground track,
//! drives the background collector through the location provider, triggers
//! reconciliation and keeps the resumable snapshot fresh.
//!
//! ## Epochs
//!
//! Every subscription, one-shot request and scheduled tick captures the
//! session epoch at the time it was created. `pause`, `reset`, `finish` and
//! every new `start` bump the epoch under the session lock, so a callback that
//! was already in flight finds a different epoch and does nothing.
//!
//! ## Locking
//!
//! The session lock is never held across a call into the location provider.
//! Providers may answer a one-shot request or deliver a watch fix on the
//! calling thread, before the request returns.
//!
//! ## Time
//!
//! Elapsed time is always `now - startTimeMillis` (or the frozen value while
//! paused). The repeating tick only decides *when* to sample pace, autosave,
//! sync the background buffer or poll; each of those is rate-limited by
//! wall-clock deltas, so missed ticks during suspension never skew results.
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use run_tracker::{
//!     GeoFix, ManualClock, ManualScheduler, MemoryStore, ReplayLocationProvider,
//!     TrackingConfig, TrackingPhase, TrackingSession,
//! };
//!
//! let provider = Arc::new(ReplayLocationProvider::new());
//! let session = TrackingSession::new(
//!     provider.clone(),
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(ManualClock::new(0)),
//!     Arc::new(ManualScheduler::new()),
//!     TrackingConfig::default(),
//! );
//!
//! session.start().unwrap();
//! provider.emit(GeoFix::new(0.0, 0.0, 0));
//! assert_eq!(session.state().phase, TrackingPhase::Tracking);
//! assert_eq!(session.state().points.len(), 1);
//! ```

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::background::{BackgroundBuffer, BackgroundCollector, TaskRegistry};
use crate::foreground::ForegroundCollector;
use crate::pace::PaceSampler;
use crate::platform::{
    select_background_strategy, BackgroundStrategy, Clock, FixCallback, LocationProvider,
    Subscription,
};
use crate::reconcile::{reconcile_from_buffer, ReconcileReport};
use crate::run::{CalorieEstimator, FinishOutcome, FinishedRun};
use crate::scheduler::{ScheduledTask, Scheduler};
use crate::snapshot::{ActiveRunStateStore, RunSnapshot};
use crate::storage::KeyValueStore;
use crate::{
    AppState, GeoFix, GeoPoint, OptionExt, PaceSample, Result, TrackingConfig, TrackingError,
    TrackingPhase,
};

/// Observable read model of the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct SessionState {
    pub phase: TrackingPhase,
    pub distance_km: f64,
    pub elapsed_seconds: u64,
    pub points: Vec<GeoPoint>,
    pub pace_samples: Vec<PaceSample>,
    pub current_fix: Option<GeoFix>,
    pub run_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum OneShotPurpose {
    /// First fix of a fresh run
    Seed,
    /// Degraded-mode background poll
    Poll,
}

// ============================================================================
// Session State
// ============================================================================

struct Inner {
    phase: TrackingPhase,
    epoch: u64,
    start_time_ms: Option<i64>,
    paused_elapsed_seconds: u64,
    run_id: Option<String>,
    foreground: ForegroundCollector,
    pace: PaceSampler,
    app_state: AppState,
    strategy: BackgroundStrategy,
    collection: Collection,
    last_autosave_ms: i64,
    last_sync_ms: i64,
    last_poll_ms: Option<i64>,
    restored: bool,
    calories: Option<Arc<dyn CalorieEstimator>>,
}

impl Inner {
    fn new(config: &TrackingConfig) -> Self {
        Self {
            phase: TrackingPhase::Idle,
            epoch: 0,
            start_time_ms: None,
            paused_elapsed_seconds: 0,
            run_id: None,
            foreground: ForegroundCollector::new(config.filter()),
            pace: PaceSampler::new(config),
            app_state: AppState::Active,
            strategy: BackgroundStrategy::Polling,
            collection: Collection::default(),
            last_autosave_ms: 0,
            last_sync_ms: 0,
            last_poll_ms: None,
            restored: false,
            calories: None,
        }
    }

    fn elapsed_seconds(&self, now_ms: i64) -> u64 {
        match (self.phase, self.start_time_ms) {
            (TrackingPhase::Tracking, Some(start)) => ((now_ms - start).max(0) / 1000) as u64,
            _ => self.paused_elapsed_seconds,
        }
    }

    fn snapshot(&self, now_ms: i64) -> RunSnapshot {
        RunSnapshot {
            is_tracking: self.phase != TrackingPhase::Idle,
            is_paused: self.phase == TrackingPhase::Paused,
            start_time_millis: self.start_time_ms,
            paused_elapsed_seconds: self.paused_elapsed_seconds,
            distance_km: self.foreground.total_km(),
            elapsed_seconds: self.elapsed_seconds(now_ms),
            points: self.foreground.points().to_vec(),
            pace_samples: self.pace.samples().to_vec(),
            last_point: self.foreground.last_point(),
            snapshot_timestamp: now_ms,
            run_id: self.run_id.clone(),
        }
    }

    /// Enter Tracking under a new epoch. Collection is opened afterwards,
    /// outside the lock.
    fn claim(&mut self, now_ms: i64) -> u64 {
        self.epoch += 1;
        self.phase = TrackingPhase::Tracking;
        self.last_autosave_ms = now_ms;
        self.last_sync_ms = now_ms;
        self.last_poll_ms = None;
        self.epoch
    }

    /// Invalidate every in-flight callback and hand back the handles to close.
    fn detach(&mut self) -> Collection {
        self.epoch += 1;
        self.last_poll_ms = None;
        std::mem::take(&mut self.collection)
    }

    fn clear_run(&mut self) {
        self.phase = TrackingPhase::Idle;
        self.start_time_ms = None;
        self.paused_elapsed_seconds = 0;
        self.run_id = None;
        self.foreground.reset();
        self.pace.reset();
    }
}

/// Handles that keep fixes flowing into the session.
///
/// Opened and closed only while the session lock is released: a provider may
/// answer a request on the calling thread.
#[derive(Default)]
struct Collection {
    subscription: Option<Box<dyn Subscription>>,
    ticker: Option<Box<dyn ScheduledTask>>,
    background_task: bool,
}

impl Collection {
    fn close(self, provider: &dyn LocationProvider, task_id: &str, stop_background: bool) {
        if let Some(subscription) = self.subscription {
            subscription.cancel();
        }
        if let Some(ticker) = self.ticker {
            ticker.cancel();
        }
        if stop_background
            && (self.background_task || provider.is_background_task_running(task_id))
        {
            if let Err(e) = provider.stop_background_updates(task_id) {
                debug!("[TrackingSession] background task already stopped: {}", e);
            }
        }
    }
}

struct Shared {
    provider: Arc<dyn LocationProvider>,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    scheduler: Arc<dyn Scheduler>,
    config: TrackingConfig,
    buffer: BackgroundBuffer,
    run_states: ActiveRunStateStore,
    inner: Mutex<Inner>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn save_snapshot(&self, inner: &Inner, now_ms: i64) {
        if inner.phase == TrackingPhase::Idle {
            return;
        }
        if let Err(e) = self.run_states.save(&inner.snapshot(now_ms)) {
            warn!("[TrackingSession] snapshot not saved: {}", e);
        }
    }

    fn clear_storage(&self) {
        if let Err(e) = self.run_states.clear() {
            warn!("[TrackingSession] snapshot not cleared: {}", e);
        }
        if let Err(e) = self.buffer.clear() {
            warn!("[TrackingSession] background buffer not cleared: {}", e);
        }
    }

    fn reconcile_locked(&self, inner: &mut Inner) -> Result<ReconcileReport> {
        reconcile_from_buffer(
            inner.foreground.accumulator_mut(),
            &self.buffer,
            inner.run_id.as_deref(),
            self.config.dedup_precision,
        )
    }

    fn reconcile_logged(&self, inner: &mut Inner) {
        if let Err(e) = self.reconcile_locked(inner) {
            warn!("[TrackingSession] reconcile skipped: {}", e);
        }
    }

    fn close(&self, collection: Collection) {
        collection.close(
            self.provider.as_ref(),
            &self.config.background_task_id,
            true,
        );
    }

    fn start_background(&self) -> BackgroundStrategy {
        let permission = self.provider.request_background_permission();
        let strategy =
            select_background_strategy(self.provider.supports_background_tasks(), permission);
        if strategy == BackgroundStrategy::Polling {
            info!("[TrackingSession] background task unavailable, using one-shot polling");
            return strategy;
        }
        match self
            .provider
            .start_background_updates(&self.config.background_task_id, &self.config.watch)
        {
            Ok(()) => BackgroundStrategy::Task,
            Err(e) => {
                warn!("[TrackingSession] falling back to one-shot polling: {}", e);
                BackgroundStrategy::Polling
            }
        }
    }

    /// Subscribe, schedule the ticker and start background collection for
    /// `epoch`. Must be called without the session lock held.
    fn open_collection(self: &Arc<Self>, epoch: u64) -> Result<(Collection, BackgroundStrategy)> {
        let weak = Arc::downgrade(self);
        let on_fix: FixCallback = Arc::new(move |fix: GeoFix| {
            if let Some(shared) = weak.upgrade() {
                shared.on_fix(epoch, fix);
            }
        });
        let subscription = self.provider.subscribe(&self.config.watch, on_fix)?;

        let weak = Arc::downgrade(self);
        let ticker = match self.scheduler.schedule_repeating(
            Duration::from_millis(self.config.tick_interval_ms),
            Arc::new(move || {
                if let Some(shared) = weak.upgrade() {
                    shared.tick(epoch);
                }
            }),
        ) {
            Ok(ticker) => ticker,
            Err(e) => {
                subscription.cancel();
                return Err(e);
            }
        };

        let strategy = self.start_background();
        let collection = Collection {
            subscription: Some(subscription),
            ticker: Some(ticker),
            background_task: strategy == BackgroundStrategy::Task,
        };
        Ok((collection, strategy))
    }

    /// Open collection for a claimed epoch and install it. If opening fails
    /// the claim is rolled back: a fresh run returns to Idle, a resumed one
    /// to Paused at its current elapsed time.
    fn activate(self: &Arc<Self>, epoch: u64, fresh_run: bool) -> Result<()> {
        let opened = self.open_collection(epoch);

        let mut inner = self.lock();
        let now = self.clock.now_ms();
        if inner.epoch != epoch {
            // paused, reset or restarted while the provider was being set up
            let phase = inner.phase;
            drop(inner);
            let (collection, _) = opened?;
            collection.close(
                self.provider.as_ref(),
                &self.config.background_task_id,
                phase != TrackingPhase::Tracking,
            );
            return Err(TrackingError::InvalidTransition {
                action: "start",
                phase,
            });
        }

        match opened {
            Ok((collection, strategy)) => {
                inner.strategy = strategy;
                inner.collection = collection;
                info!(
                    "[TrackingSession] collecting at {}s ({:?})",
                    inner.elapsed_seconds(now),
                    strategy
                );
                self.save_snapshot(&inner, now);
                Ok(())
            }
            Err(e) => {
                inner.epoch += 1;
                if fresh_run {
                    inner.clear_run();
                } else {
                    inner.paused_elapsed_seconds = inner.elapsed_seconds(now);
                    inner.phase = TrackingPhase::Paused;
                }
                warn!("[TrackingSession] could not open location updates: {}", e);
                Err(e)
            }
        }
    }

    fn on_fix(&self, epoch: u64, fix: GeoFix) {
        let mut inner = self.lock();
        if inner.epoch != epoch || inner.phase != TrackingPhase::Tracking {
            return;
        }
        let now = self.clock.now_ms();
        inner.foreground.on_fix(fix, now);
    }

    fn on_one_shot(&self, epoch: u64, purpose: OneShotPurpose, fix: Option<GeoFix>) {
        let Some(fix) = fix else {
            debug!("[TrackingSession] {:?} fix timed out", purpose);
            return;
        };
        let mut inner = self.lock();
        if inner.epoch != epoch || inner.phase != TrackingPhase::Tracking {
            return;
        }
        let now = self.clock.now_ms();
        match purpose {
            OneShotPurpose::Seed => {
                if inner.foreground.seed(fix, now) {
                    debug!("[TrackingSession] track seeded from initial fix");
                }
            }
            OneShotPurpose::Poll => {
                inner.foreground.on_fix(fix, now);
            }
        }
    }

    /// Must be called without the session lock held.
    fn request_one_shot(self: &Arc<Self>, epoch: u64, purpose: OneShotPurpose) {
        let timeout_ms = match purpose {
            OneShotPurpose::Seed => self.config.initial_fix_timeout_ms,
            OneShotPurpose::Poll => self.config.poll_fix_timeout_ms,
        };
        let weak = Arc::downgrade(self);
        self.provider.request_current_fix(
            self.config.watch.accuracy,
            timeout_ms,
            Box::new(move |fix: Option<GeoFix>| {
                if let Some(shared) = weak.upgrade() {
                    shared.on_one_shot(epoch, purpose, fix);
                }
            }),
        );
    }

    fn tick(self: &Arc<Self>, epoch: u64) {
        let poll_due = {
            let mut inner = self.lock();
            if inner.epoch != epoch || inner.phase != TrackingPhase::Tracking {
                return;
            }
            let now = self.clock.now_ms();
            let hidden = inner.app_state != AppState::Active;
            let mut poll_due = false;

            if hidden {
                match inner.strategy {
                    BackgroundStrategy::Task => {
                        if now - inner.last_sync_ms >= self.config.background_sync_interval_ms {
                            inner.last_sync_ms = now;
                            self.reconcile_logged(&mut inner);
                        }
                    }
                    BackgroundStrategy::Polling => {
                        poll_due = inner.last_poll_ms.map_or(true, |last| {
                            now - last >= self.config.degraded_poll_interval_ms
                        });
                        if poll_due {
                            inner.last_poll_ms = Some(now);
                        }
                    }
                }
            }

            let elapsed = inner.elapsed_seconds(now);
            let distance = inner.foreground.total_km();
            if let Some(sample) = inner.pace.maybe_sample(now, elapsed, distance) {
                debug!(
                    "[TrackingSession] pace {:.2} min/km at {}s",
                    sample.pace_min_per_km, sample.elapsed_seconds
                );
            }

            if now - inner.last_autosave_ms >= self.config.autosave_interval_ms {
                inner.last_autosave_ms = now;
                self.save_snapshot(&inner, now);
            }
            poll_due
        };

        if poll_due {
            self.request_one_shot(epoch, OneShotPurpose::Poll);
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(|e| e.into_inner());
        let collection = std::mem::take(&mut inner.collection);
        // the OS task outlives the process; only in-process delivery stops
        collection.close(
            self.provider.as_ref(),
            &self.config.background_task_id,
            false,
        );
    }
}

// ============================================================================
// Public API
// ============================================================================

/// Run-tracking orchestrator. Cheap to clone; clones share one session.
#[derive(Clone)]
pub struct TrackingSession {
    shared: Arc<Shared>,
}

impl TrackingSession {
    pub fn new(
        provider: Arc<dyn LocationProvider>,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        scheduler: Arc<dyn Scheduler>,
        config: TrackingConfig,
    ) -> Self {
        let run_states = ActiveRunStateStore::new(store.clone(), clock.clone(), &config);
        let inner = Inner::new(&config);
        Self {
            shared: Arc::new(Shared {
                provider,
                buffer: BackgroundBuffer::new(store.clone()),
                store,
                clock,
                scheduler,
                run_states,
                inner: Mutex::new(inner),
                config,
            }),
        }
    }

    pub fn set_calorie_estimator(&self, estimator: Arc<dyn CalorieEstimator>) {
        self.shared.lock().calories = Some(estimator);
    }

    /// Register a background collector sharing this session's store, clock
    /// and thresholds under the configured task id.
    pub fn register_background_task(&self, registry: &TaskRegistry) -> Arc<BackgroundCollector> {
        BackgroundCollector::register(
            registry,
            self.shared.store.clone(),
            &self.shared.config,
            self.shared.clock.clone(),
        )
    }

    pub fn config(&self) -> &TrackingConfig {
        &self.shared.config
    }

    pub fn state(&self) -> SessionState {
        let inner = self.shared.lock();
        let now = self.shared.clock.now_ms();
        SessionState {
            phase: inner.phase,
            distance_km: inner.foreground.total_km(),
            elapsed_seconds: inner.elapsed_seconds(now),
            points: inner.foreground.points().to_vec(),
            pace_samples: inner.pace.samples().to_vec(),
            current_fix: inner.foreground.current_fix(),
            run_id: inner.run_id.clone(),
        }
    }

    pub fn phase(&self) -> TrackingPhase {
        self.shared.lock().phase
    }

    /// How location is being collected while hidden, if tracking.
    pub fn background_strategy(&self) -> Option<BackgroundStrategy> {
        let inner = self.shared.lock();
        (inner.phase == TrackingPhase::Tracking).then_some(inner.strategy)
    }

    /// Start a new run from Idle, or resume from Paused.
    ///
    /// Fails with `PermissionDenied` or `ServiceUnavailable` without changing
    /// any state.
    pub fn start(&self) -> Result<()> {
        let phase = self.phase();
        if phase == TrackingPhase::Tracking {
            return Err(TrackingError::InvalidTransition {
                action: "start",
                phase,
            });
        }

        let provider = &self.shared.provider;
        if !provider.request_permission().is_granted() {
            warn!("[TrackingSession] start refused: permission denied");
            return Err(TrackingError::PermissionDenied);
        }
        if !provider.services_enabled() {
            warn!("[TrackingSession] start refused: location services disabled");
            return Err(TrackingError::ServiceUnavailable);
        }

        let (epoch, fresh_run) = {
            let mut inner = self.shared.lock();
            let phase = inner.phase;
            if phase == TrackingPhase::Tracking {
                return Err(TrackingError::InvalidTransition {
                    action: "start",
                    phase,
                });
            }
            let now = self.shared.clock.now_ms();
            let fresh_run = phase == TrackingPhase::Idle;

            if fresh_run {
                let run_id = Uuid::new_v4().to_string();
                if let Err(e) = self.shared.buffer.begin_run(&run_id) {
                    warn!("[TrackingSession] background buffer not reset: {}", e);
                }
                inner.foreground.reset();
                inner.pace.reset();
                inner.start_time_ms = Some(now);
                inner.paused_elapsed_seconds = 0;
                info!("[TrackingSession] run {} started", run_id);
                inner.run_id = Some(run_id);
            } else {
                inner.start_time_ms = Some(now - inner.paused_elapsed_seconds as i64 * 1000);
                info!(
                    "[TrackingSession] resuming at {}s",
                    inner.paused_elapsed_seconds
                );
            }
            (inner.claim(now), fresh_run)
        };

        self.shared.activate(epoch, fresh_run)?;
        if fresh_run {
            self.shared.request_one_shot(epoch, OneShotPurpose::Seed);
        }
        Ok(())
    }

    /// Freeze the timer and stop all collection.
    pub fn pause(&self) -> Result<()> {
        let (epoch, collection) = {
            let mut inner = self.shared.lock();
            if inner.phase != TrackingPhase::Tracking {
                return Err(TrackingError::InvalidTransition {
                    action: "pause",
                    phase: inner.phase,
                });
            }
            let now = self.shared.clock.now_ms();
            inner.paused_elapsed_seconds = inner.elapsed_seconds(now);
            inner.phase = TrackingPhase::Paused;
            let collection = inner.detach();
            (inner.epoch, collection)
        };
        self.shared.close(collection);

        // the background task is stopped, so this merge is final
        let mut inner = self.shared.lock();
        if inner.epoch == epoch {
            self.shared.reconcile_logged(&mut inner);
            info!(
                "[TrackingSession] paused at {}s, {:.3} km",
                inner.paused_elapsed_seconds,
                inner.foreground.total_km()
            );
            self.shared.save_snapshot(&inner, self.shared.clock.now_ms());
        }
        Ok(())
    }

    /// Discard the run entirely, including everything persisted for it.
    pub fn reset(&self) {
        let (epoch, collection) = {
            let mut inner = self.shared.lock();
            let collection = inner.detach();
            inner.clear_run();
            (inner.epoch, collection)
        };
        self.shared.close(collection);

        let inner = self.shared.lock();
        if inner.epoch == epoch {
            self.shared.clear_storage();
        }
        info!("[TrackingSession] reset");
    }

    /// End the run and produce its record.
    ///
    /// Requires some elapsed time. A run with no accepted distance is returned
    /// as [`FinishOutcome::ZeroDistance`] for the caller to confirm.
    pub fn finish(&self) -> Result<FinishOutcome> {
        let now = self.shared.clock.now_ms();
        let (epoch, elapsed, collection) = {
            let mut inner = self.shared.lock();
            let elapsed = inner.elapsed_seconds(now);
            if elapsed == 0 {
                return Err(TrackingError::NothingToFinish);
            }
            inner.paused_elapsed_seconds = elapsed;
            inner.phase = TrackingPhase::Paused;
            let collection = inner.detach();
            (inner.epoch, elapsed, collection)
        };
        self.shared.close(collection);

        let mut inner = self.shared.lock();
        if inner.epoch != epoch {
            return Err(TrackingError::InvalidTransition {
                action: "finish",
                phase: inner.phase,
            });
        }
        self.shared.reconcile_logged(&mut inner);

        let distance_km = inner.foreground.total_km();
        inner.pace.backfill(elapsed, distance_km);
        let calories = inner
            .calories
            .as_ref()
            .map_or(0, |estimator| estimator.estimate(distance_km, elapsed));

        let run = FinishedRun::new(
            distance_km,
            elapsed,
            now,
            inner.foreground.points().to_vec(),
            inner.pace.samples().to_vec(),
            calories,
        );

        inner.clear_run();
        self.shared.clear_storage();
        drop(inner);

        info!(
            "[TrackingSession] finished: {} m in {}s, {} points",
            run.distance_meters,
            elapsed,
            run.path_points.len()
        );
        if distance_km > 0.0 {
            Ok(FinishOutcome::Completed { run })
        } else {
            warn!("[TrackingSession] finished with zero distance");
            Ok(FinishOutcome::ZeroDistance { run })
        }
    }

    /// Resume the persisted run, if any. Runs at most once per session.
    ///
    /// Returns whether a snapshot was applied.
    pub fn restore(&self) -> Result<bool> {
        let (start, epoch) = {
            let mut inner = self.shared.lock();
            if inner.restored {
                return Ok(false);
            }
            inner.restored = true;
            if inner.phase != TrackingPhase::Idle {
                debug!("[TrackingSession] restore skipped, run already in progress");
                return Ok(false);
            }

            let snapshot = match self.shared.run_states.load() {
                Ok(Some(snapshot)) => snapshot,
                Ok(None) => return Ok(false),
                Err(e) => {
                    warn!("[TrackingSession] snapshot unreadable: {}", e);
                    return Ok(false);
                }
            };

            inner.foreground.restore(
                snapshot.points.clone(),
                snapshot.distance_km,
                snapshot.last_point,
            );
            inner.pace.restore(snapshot.pace_samples.clone());
            inner.run_id = snapshot.run_id.clone();
            inner.start_time_ms = snapshot.start_time_millis;
            inner.paused_elapsed_seconds = snapshot.elapsed_seconds;
            inner.phase = TrackingPhase::Paused;

            if !snapshot.is_running() {
                info!(
                    "[TrackingSession] paused run restored at {}s",
                    inner.paused_elapsed_seconds
                );
                self.shared.save_snapshot(&inner, self.shared.clock.now_ms());
                return Ok(true);
            }
            self.shared.reconcile_logged(&mut inner);
            (
                snapshot.start_time_millis.ok_or_missing_key("startTimeMillis"),
                inner.epoch,
            )
        };

        match start.and_then(|start| self.resume_restored(start, epoch)) {
            Ok(()) => {
                let state = self.state();
                info!(
                    "[TrackingSession] resumed run at {}s, {:.3} km",
                    state.elapsed_seconds, state.distance_km
                );
            }
            Err(e) => {
                info!("[TrackingSession] run restored paused: {}", e);
                let inner = self.shared.lock();
                self.shared.save_snapshot(&inner, self.shared.clock.now_ms());
            }
        }
        Ok(true)
    }

    fn resume_restored(&self, start_ms: i64, restored_epoch: u64) -> Result<()> {
        if !self.shared.provider.request_permission().is_granted() {
            return Err(TrackingError::PermissionDenied);
        }
        let epoch = {
            let mut inner = self.shared.lock();
            if inner.epoch != restored_epoch || inner.phase != TrackingPhase::Paused {
                return Err(TrackingError::InvalidTransition {
                    action: "resume",
                    phase: inner.phase,
                });
            }
            inner.start_time_ms = Some(start_ms);
            inner.claim(self.shared.clock.now_ms())
        };
        self.shared.activate(epoch, false)
    }

    /// React to the host's lifecycle signal.
    pub fn on_app_state_changed(&self, app_state: AppState) {
        let mut inner = self.shared.lock();
        let previous = inner.app_state;
        inner.app_state = app_state;
        if previous == app_state || inner.phase == TrackingPhase::Idle {
            return;
        }
        let now = self.shared.clock.now_ms();

        match app_state {
            AppState::Background | AppState::Inactive => {
                debug!("[TrackingSession] app hidden, saving snapshot");
            }
            AppState::Active => {
                if inner.phase == TrackingPhase::Tracking {
                    self.shared.reconcile_logged(&mut inner);
                }
            }
        }
        self.shared.save_snapshot(&inner, now);
    }

    /// Merge the background buffer into the foreground track now.
    pub fn reconcile_now(&self) -> Result<ReconcileReport> {
        let mut inner = self.shared.lock();
        if inner.phase == TrackingPhase::Idle {
            return Err(TrackingError::InvalidTransition {
                action: "reconcile",
                phase: inner.phase,
            });
        }
        self.shared.reconcile_locked(&mut inner)
    }

    /// The unified track. Reconciles first while a run is in progress.
    pub fn get_all_points(&self) -> Vec<GeoPoint> {
        let mut inner = self.shared.lock();
        if inner.phase != TrackingPhase::Idle {
            self.shared.reconcile_logged(&mut inner);
        }
        inner.foreground.points().to_vec()
    }
}
