//! Sweep scheduler
//!
//! Runs [`Tracker::sweep`] on wall-clock minute boundaries with cron `*/N`
//! semantics: every minute of the hour divisible by the period (:00, :05, :10
//! ... for 5; :00, :07 ... :56 and again :00 for 7), plus one sweep shortly
//! after start.
//!
//! The next boundary is recomputed from the [`Clock`] before every wait, so a
//! clock step or a suspended host does not drift later sweeps off the minute.
//!
//! Sweeps never overlap: a boundary that arrives while a sweep is still running
//! is skipped and logged.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::tracker::Tracker;

/// Source of wall-clock time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Sweep period in whole minutes (1 to 60)
    pub interval_minutes: u32,

    /// Delay before the start-up sweep
    pub initial_delay: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_minutes: 5,
            initial_delay: Duration::from_secs(2),
        }
    }
}

impl SchedulerConfig {
    pub fn with_interval_minutes(mut self, minutes: u32) -> Self {
        self.interval_minutes = minutes.clamp(1, MAX_INTERVAL_MINUTES);
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }
}

/// Longest period a minute-of-hour schedule can express
pub const MAX_INTERVAL_MINUTES: u32 = 60;

/// First boundary strictly after `now`
///
/// A boundary is a whole minute whose minute-of-hour is divisible by
/// `interval_minutes`, so every hour restarts at :00.
pub fn next_boundary(now: DateTime<Utc>, interval_minutes: u32) -> DateTime<Utc> {
    let step = interval_minutes.clamp(1, MAX_INTERVAL_MINUTES);
    let mut candidate = (now.timestamp().div_euclid(60) + 1) * 60;

    // At most one hour of candidates
    for _ in 0..60 {
        match DateTime::from_timestamp(candidate, 0) {
            Some(at) if at.minute() % step == 0 => return at,
            Some(_) => candidate += 60,
            None => break,
        }
    }
    now
}

/// Counters exposed through `/status`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerStatus {
    pub running: bool,
    pub interval_minutes: u32,
    pub sweeps_started: u64,
    pub sweeps_completed: u64,
    pub sweeps_skipped: u64,
}

/// Runs sweeps and enforces the no-overlap rule
struct SweepRunner {
    tracker: Arc<Tracker>,
    in_progress: AtomicBool,
    started: AtomicU64,
    completed: AtomicU64,
    skipped: AtomicU64,
}

impl SweepRunner {
    fn trigger(self: &Arc<Self>, reason: &'static str) {
        if self.in_progress.swap(true, Ordering::SeqCst) {
            self.skipped.fetch_add(1, Ordering::SeqCst);
            warn!(reason, "Previous sweep still running, skipping this tick");
            return;
        }

        self.started.fetch_add(1, Ordering::SeqCst);
        debug!(reason, "Sweep triggered");
        let runner = Arc::clone(self);
        tokio::spawn(async move {
            let _guard = InProgressGuard(Arc::clone(&runner));
            runner.tracker.sweep().await;
            runner.completed.fetch_add(1, Ordering::SeqCst);
        });
    }
}

/// Clears the in-progress flag when the sweep task ends, panics included
struct InProgressGuard(Arc<SweepRunner>);

impl Drop for InProgressGuard {
    fn drop(&mut self) {
        self.0.in_progress.store(false, Ordering::SeqCst);
    }
}

struct RunningState {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Periodic sweep trigger with STOPPED and RUNNING states
pub struct Scheduler {
    config: SchedulerConfig,
    clock: Arc<dyn Clock>,
    runner: Arc<SweepRunner>,
    state: Mutex<Option<RunningState>>,
}

impl Scheduler {
    pub fn new(tracker: Arc<Tracker>, config: SchedulerConfig) -> Self {
        Self::with_clock(tracker, config, Arc::new(SystemClock))
    }

    pub fn with_clock(tracker: Arc<Tracker>, config: SchedulerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            runner: Arc::new(SweepRunner {
                tracker,
                in_progress: AtomicBool::new(false),
                started: AtomicU64::new(0),
                completed: AtomicU64::new(0),
                skipped: AtomicU64::new(0),
            }),
            state: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Begin periodic sweeps; a second call while running only logs a warning
    pub async fn start(&self) {
        let mut state = self.state.lock().await;
        if state.is_some() {
            warn!("Scheduler already running");
            return;
        }

        let interval_minutes = self.config.interval_minutes;
        info!(
            interval_minutes,
            first_sweep = %next_boundary(self.clock.now(), interval_minutes),
            "Starting scheduler"
        );

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let runner = Arc::clone(&self.runner);
        let clock = Arc::clone(&self.clock);
        let initial_delay = self.config.initial_delay;

        let handle = tokio::spawn(async move {
            let initial = tokio::time::sleep(initial_delay);
            tokio::pin!(initial);
            let mut initial_done = false;
            let mut last_fired: Option<DateTime<Utc>> = None;

            loop {
                // A clock read just short of the boundary we woke for must not fire it twice
                let now = clock.now();
                let from = last_fired.map_or(now, |fired| fired.max(now));
                let boundary = next_boundary(from, interval_minutes);
                let wait = (boundary - now).to_std().unwrap_or(Duration::ZERO);

                tokio::select! {
                    _ = &mut initial, if !initial_done => {
                        initial_done = true;
                        runner.trigger("startup");
                    }
                    _ = tokio::time::sleep(wait) => {
                        last_fired = Some(boundary);
                        runner.trigger("boundary");
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("Scheduler loop: shutdown requested");
                        break;
                    }
                }
            }
        });

        *state = Some(RunningState {
            shutdown_tx,
            handle,
        });
    }

    /// Cancel the trigger and release the shared page source
    ///
    /// Idempotent. A sweep already in flight runs to completion.
    pub async fn stop(&self) {
        let Some(running) = self.state.lock().await.take() else {
            debug!("Scheduler already stopped");
            return;
        };

        let _ = running.shutdown_tx.send(true);
        if let Err(e) = running.handle.await {
            warn!(error = %e, "Scheduler loop ended abnormally");
        }

        self.runner.tracker.acquirer().close().await;
        info!("Scheduler stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.is_some()
    }

    /// Whether a sweep is executing right now
    pub fn sweep_in_progress(&self) -> bool {
        self.runner.in_progress.load(Ordering::SeqCst)
    }

    pub async fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            running: self.is_running().await,
            interval_minutes: self.config.interval_minutes,
            sweeps_started: self.runner.started.load(Ordering::SeqCst),
            sweeps_completed: self.runner.completed.load(Ordering::SeqCst),
            sweeps_skipped: self.runner.skipped.load(Ordering::SeqCst),
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
