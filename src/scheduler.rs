//! Repeating-task scheduling for the session driver.
//!
//! The session never counts ticks; each tick re-derives what is due from the
//! wall clock, so a scheduler that fires late, early, or not at all while the
//! process is suspended only delays work, never skews it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::debug;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::{Result, TrackingError};

/// Body of a repeating task.
pub type TaskFn = Arc<dyn Fn() + Send + Sync>;

/// Handle to a scheduled repeating task.
pub trait ScheduledTask: Send {
    /// Stop the task. The body is not started again after this returns.
    fn cancel(self: Box<Self>);
}

pub trait Scheduler: Send + Sync {
    fn schedule_repeating(&self, period: Duration, task: TaskFn) -> Result<Box<dyn ScheduledTask>>;
}

// ============================================================================
// Tokio
// ============================================================================

/// Scheduler backed by a tokio runtime interval.
#[derive(Clone)]
pub struct TokioScheduler {
    handle: Handle,
}

impl TokioScheduler {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Use the runtime of the calling context.
    pub fn current() -> Result<Self> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| TrackingError::Scheduler {
                message: e.to_string(),
            })
    }
}

struct TokioTask {
    join: JoinHandle<()>,
    cancelled: Arc<AtomicBool>,
}

impl ScheduledTask for TokioTask {
    fn cancel(self: Box<Self>) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.join.abort();
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_repeating(&self, period: Duration, task: TaskFn) -> Result<Box<dyn ScheduledTask>> {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();

        let join = self.handle.spawn(async move {
            let mut interval = time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                if flag.load(Ordering::SeqCst) {
                    break;
                }
                task();
            }
        });

        debug!("[Scheduler] repeating task every {:?}", period);
        Ok(Box::new(TokioTask { join, cancelled }))
    }
}

// ============================================================================
// Manual
// ============================================================================

struct ManualEntry {
    task: TaskFn,
    cancelled: Arc<AtomicBool>,
}

/// Scheduler whose tasks only run when [`run_pending`](Self::run_pending) is
/// called. Deterministic driver for replay and tests.
#[derive(Default)]
pub struct ManualScheduler {
    entries: Mutex<Vec<ManualEntry>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every live task once.
    pub fn run_pending(&self) {
        let tasks: Vec<TaskFn> = {
            let mut guard = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            guard.retain(|entry| !entry.cancelled.load(Ordering::SeqCst));
            guard.iter().map(|entry| entry.task.clone()).collect()
        };
        for task in tasks {
            task();
        }
    }

    pub fn active_tasks(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|entry| !entry.cancelled.load(Ordering::SeqCst))
            .count()
    }
}

struct ManualTask {
    cancelled: Arc<AtomicBool>,
}

impl ScheduledTask for ManualTask {
    fn cancel(self: Box<Self>) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_repeating(
        &self,
        _period: Duration,
        task: TaskFn,
    ) -> Result<Box<dyn ScheduledTask>> {
        let cancelled = Arc::new(AtomicBool::new(false));
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(ManualEntry {
                task,
                cancelled: cancelled.clone(),
            });
        Ok(Box::new(ManualTask { cancelled }))
    }
}
