//! Delayed and periodic timers running outside the VPU phases.
//!
//! The [`TemporalScheduler`] validates requests, assigns timer ids and wraps each callback in a
//! [`TaskEntry`] whose cancel action stops the backend timer. Two interchangeable backends track
//! time on dedicated threads:
//!
//! - [`ThreadPoolTimers`]: one background thread with a deadline heap; callbacks run on that
//!   thread, serialized by a lock.
//! - [`IsolatedWorkerTimers`]: timer bookkeeping lives on a worker thread that shares no state
//!   with the scheduling side and talks to it only through the JSON messages in [`protocol`].

pub mod protocol;
mod thread_pool;
mod worker;

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::config::SchedulerConfig;
use crate::core::error::{SchedulerError, UncaughtError};
use crate::core::task::{Cancelable, Task, TaskEntry, TaskState};
use crate::core::uncaught::UncaughtErrorRegistry;

pub use thread_pool::ThreadPoolTimers;
pub use worker::IsolatedWorkerTimers;

/// Callback invoked by a backend each time a timer fires.
pub type TimerCallback = Arc<dyn Fn() -> Result<(), UncaughtError> + Send + Sync + 'static>;

/// One-shot or repeating timer. Serialized as the protocol's `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimerKind {
    /// Fires once after its delay.
    #[serde(rename = "dt")]
    Delayed,
    /// Fires every period until cancelled.
    #[serde(rename = "pt")]
    Periodic,
}

/// A timer registration as seen by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerSpec {
    /// Monotonically assigned id, starting at 1.
    pub id: u64,
    /// Diagnostic name of the task.
    pub name: Option<String>,
    /// Delayed or periodic.
    pub kind: TimerKind,
    /// Delay or period in milliseconds.
    pub interval_ms: u64,
}

/// Capability provided by each timer backend.
pub trait TimerBackend: Send + Sync {
    /// Start tracking `timer`, invoking `callback` when it fires.
    ///
    /// # Errors
    ///
    /// `Backend` if the timer thread has stopped.
    fn schedule(&self, timer: TimerSpec, callback: TimerCallback) -> Result<(), SchedulerError>;

    /// Stop a timer. Unknown or already fired timers are ignored.
    fn cancel(&self, timer: &TimerSpec);

    /// Signal the backend threads to stop and drop every pending timer. Never blocks, so it is
    /// safe to call from a timer callback or while an activation is running.
    fn shutdown(&self);

    /// Wait for the backend threads signalled by [`TimerBackend::shutdown`] to exit.
    ///
    /// Blocks until any callback in flight returns. Callers holding a lock a callback may need
    /// must not join.
    fn join(&self) {}
}

/// Run a timer callback on a backend thread, forwarding failures to the error registry.
pub(crate) fn fire(errors: &UncaughtErrorRegistry, id: u64, callback: &TimerCallback) {
    let outcome = catch_unwind(AssertUnwindSafe(|| callback()))
        .unwrap_or_else(|payload| Err(UncaughtError::from_panic(payload.as_ref())));
    if let Err(error) = outcome {
        tracing::debug!(timer_id = id, error = %error, "timer callback failed");
        errors.report(&error);
    }
}

/// Schedules delayed and periodic tasks on the configured backend.
pub struct TemporalScheduler {
    started: Instant,
    next_id: AtomicU64,
    check_invariants: bool,
    backend: Arc<dyn TimerBackend>,
}

impl TemporalScheduler {
    /// Start the backend selected by `use_isolated_worker_for_timers`.
    ///
    /// # Errors
    ///
    /// `Backend` if a timer thread cannot be spawned.
    pub fn new(
        config: &SchedulerConfig,
        errors: Arc<UncaughtErrorRegistry>,
    ) -> Result<Self, SchedulerError> {
        let backend: Arc<dyn TimerBackend> = if config.use_isolated_worker_for_timers {
            Arc::new(IsolatedWorkerTimers::start(errors, config.log_timer_protocol)?)
        } else {
            Arc::new(ThreadPoolTimers::start(errors)?)
        };
        Ok(Self::with_backend(backend, config.check_invariants))
    }

    /// Use an already running backend.
    #[must_use]
    pub fn with_backend(backend: Arc<dyn TimerBackend>, check_invariants: bool) -> Self {
        Self {
            started: Instant::now(),
            next_id: AtomicU64::new(1),
            check_invariants,
            backend,
        }
    }

    /// Milliseconds elapsed since the scheduler started.
    #[must_use]
    pub fn now(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Run `task` once after `delay` milliseconds.
    ///
    /// # Errors
    ///
    /// `NegativeDelay` when invariant checking is on, `Backend` if the timer thread stopped.
    pub fn delayed_task(
        &self,
        name: Option<&str>,
        task: Task,
        delay: i64,
    ) -> Result<Cancelable, SchedulerError> {
        self.check_delay(name, delay)?;
        let interval_ms = u64::try_from(delay).unwrap_or(0);
        let (spec, entry) = self.register(name, TimerKind::Delayed, interval_ms, task);
        let fired = Arc::clone(&entry);
        self.backend
            .schedule(spec, Arc::new(move || fired.execute()))?;
        Ok(Cancelable::new(&entry))
    }

    /// Run `task` every `period` milliseconds until cancelled.
    ///
    /// # Errors
    ///
    /// `NonPositivePeriod` when invariant checking is on, `Backend` if the timer thread stopped.
    pub fn periodic_task(
        &self,
        name: Option<&str>,
        task: Task,
        period: i64,
    ) -> Result<Cancelable, SchedulerError> {
        self.check_period(name, period)?;
        let interval_ms = u64::try_from(period).unwrap_or(0).max(1);
        let (spec, entry) = self.register(name, TimerKind::Periodic, interval_ms, task.clone());
        let fired = Arc::clone(&entry);
        self.backend.schedule(
            spec,
            Arc::new(move || {
                if fired.state() == TaskState::Pending {
                    task.invoke()
                } else {
                    Ok(())
                }
            }),
        )?;
        Ok(Cancelable::new(&entry))
    }

    /// Reject a negative delay when invariant checking is on.
    pub(crate) fn check_delay(&self, name: Option<&str>, delay: i64) -> Result<(), SchedulerError> {
        if self.check_invariants && delay < 0 {
            return Err(SchedulerError::NegativeDelay {
                task: display_name(name),
                delay,
            });
        }
        Ok(())
    }

    /// Reject a non-positive period when invariant checking is on.
    pub(crate) fn check_period(&self, name: Option<&str>, period: i64) -> Result<(), SchedulerError> {
        if self.check_invariants && period <= 0 {
            return Err(SchedulerError::NonPositivePeriod {
                task: display_name(name),
                period,
            });
        }
        Ok(())
    }

    fn register(
        &self,
        name: Option<&str>,
        kind: TimerKind,
        interval_ms: u64,
        task: Task,
    ) -> (TimerSpec, Arc<TaskEntry>) {
        let spec = TimerSpec {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            name: name.map(ToString::to_string),
            kind,
            interval_ms,
        };
        let backend: Weak<dyn TimerBackend> = Arc::downgrade(&self.backend);
        let cancelled = spec.clone();
        let entry = Arc::new(TaskEntry::with_cancel_action(
            spec.name.clone(),
            task,
            Some(Box::new(move || {
                if let Some(backend) = backend.upgrade() {
                    backend.cancel(&cancelled);
                }
            })),
        ));
        tracing::debug!(timer_id = spec.id, kind = ?kind, interval_ms, "timer registered");
        (spec, entry)
    }

    /// Signal the backend threads to stop. Pending timers never fire.
    pub fn shutdown(&self) {
        self.backend.shutdown();
    }

    /// Wait for the backend threads to exit after [`TemporalScheduler::shutdown`].
    pub fn join(&self) {
        self.backend.join();
    }
}

fn display_name(name: Option<&str>) -> String {
    name.unwrap_or("<anonymous>").to_string()
}

impl fmt::Debug for TemporalScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemporalScheduler")
            .field("now", &self.now())
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingBackend {
        scheduled: Mutex<Vec<(TimerSpec, TimerCallback)>>,
        cancelled: Mutex<Vec<u64>>,
    }

    impl TimerBackend for RecordingBackend {
        fn schedule(&self, timer: TimerSpec, callback: TimerCallback) -> Result<(), SchedulerError> {
            self.scheduled.lock().push((timer, callback));
            Ok(())
        }

        fn cancel(&self, timer: &TimerSpec) {
            self.cancelled.lock().push(timer.id);
        }

        fn shutdown(&self) {}
    }

    fn scheduler(check_invariants: bool) -> (TemporalScheduler, Arc<RecordingBackend>) {
        let backend = Arc::new(RecordingBackend::default());
        (
            TemporalScheduler::with_backend(backend.clone(), check_invariants),
            backend,
        )
    }

    fn counter() -> (Task, Arc<AtomicU64>) {
        let runs = Arc::new(AtomicU64::new(0));
        let inner = Arc::clone(&runs);
        (
            Task::new(move || {
                inner.fetch_add(1, Ordering::SeqCst);
            }),
            runs,
        )
    }

    #[test]
    fn test_ids_start_at_one_and_increase() {
        let (scheduler, backend) = scheduler(true);
        scheduler.delayed_task(Some("a"), counter().0, 10).unwrap();
        scheduler.periodic_task(Some("b"), counter().0, 5).unwrap();
        let scheduled = backend.scheduled.lock();
        assert_eq!(scheduled[0].0.id, 1);
        assert_eq!(scheduled[0].0.kind, TimerKind::Delayed);
        assert_eq!(scheduled[0].0.interval_ms, 10);
        assert_eq!(scheduled[1].0.id, 2);
        assert_eq!(scheduled[1].0.kind, TimerKind::Periodic);
        assert_eq!(scheduled[1].0.name.as_deref(), Some("b"));
    }

    #[test]
    fn test_argument_validation() {
        let (scheduler, backend) = scheduler(true);
        let err = scheduler.delayed_task(Some("late"), counter().0, -1).unwrap_err();
        assert_eq!(err.code(), "negative-delay");
        assert!(err.to_string().contains("'late'"));
        let err = scheduler.periodic_task(None, counter().0, 0).unwrap_err();
        assert_eq!(err.code(), "non-positive-period");
        assert!(backend.scheduled.lock().is_empty());
    }

    #[test]
    fn test_arguments_clamped_without_invariant_checks() {
        let (scheduler, backend) = scheduler(false);
        scheduler.delayed_task(None, counter().0, -5).unwrap();
        scheduler.periodic_task(None, counter().0, -5).unwrap();
        let scheduled = backend.scheduled.lock();
        assert_eq!(scheduled[0].0.interval_ms, 0);
        assert_eq!(scheduled[1].0.interval_ms, 1);
    }

    #[test]
    fn test_delayed_fire_then_cancel_is_noop() {
        let (scheduler, backend) = scheduler(true);
        let (task, runs) = counter();
        let handle = scheduler.delayed_task(None, task, 0).unwrap();
        let callback = Arc::clone(&backend.scheduled.lock()[0].1);

        callback().unwrap();
        callback().unwrap();
        handle.cancel();

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(backend.cancelled.lock().is_empty());
        assert_eq!(handle.state(), Some(TaskState::Executed));
    }

    #[test]
    fn test_cancel_wins_over_late_fire() {
        let (scheduler, backend) = scheduler(true);
        let (task, runs) = counter();
        let handle = scheduler.periodic_task(Some("tick"), task, 1).unwrap();
        let callback = Arc::clone(&backend.scheduled.lock()[0].1);

        callback().unwrap();
        callback().unwrap();
        handle.cancel();
        handle.cancel();
        callback().unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(*backend.cancelled.lock(), vec![1]);
    }

    #[test]
    fn test_fire_reports_failures() {
        let errors = UncaughtErrorRegistry::new(true, true);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        errors
            .add(Arc::new(move |error: &UncaughtError| sink.lock().push(error.to_string())))
            .unwrap();

        let failing: TimerCallback =
            Arc::new(|| -> Result<(), UncaughtError> { Err(UncaughtError::Panicked("boom".into())) });
        fire(&errors, 1, &failing);
        let panicking: TimerCallback = Arc::new(|| -> Result<(), UncaughtError> { panic!("kaboom") });
        fire(&errors, 2, &panicking);

        assert_eq!(
            *seen.lock(),
            vec!["task panicked: boom".to_string(), "task panicked: kaboom".to_string()]
        );
    }
}
