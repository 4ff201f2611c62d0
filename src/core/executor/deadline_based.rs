//! Deadline-based executor: cooperative time slicing.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::SchedulerConfig;
use crate::core::error::SchedulerError;
use crate::core::uncaught::UncaughtErrorRegistry;

use super::{ActivationTrigger, Executor, ExecutorCore};

/// Minimum remaining time, in time units, needed to start another task.
pub const MIN_TASK_TIME: i64 = 1;

/// Reports the time remaining before the executor must yield.
pub trait DeadlineProbe {
    /// Remaining time in time units. Zero or negative means the deadline passed.
    fn time_remaining(&self) -> i64;
}

impl<F> DeadlineProbe for F
where
    F: Fn() -> i64,
{
    fn time_remaining(&self) -> i64 {
        self()
    }
}

/// Probe counting down a fixed budget from the moment it is created.
#[derive(Debug, Clone, Copy)]
pub struct TimeBudget {
    started: Instant,
    budget: Duration,
}

impl TimeBudget {
    /// Start a budget of `budget_ms` milliseconds.
    #[must_use]
    pub fn new(budget_ms: u64) -> Self {
        Self {
            started: Instant::now(),
            budget: Duration::from_millis(budget_ms),
        }
    }
}

impl DeadlineProbe for TimeBudget {
    fn time_remaining(&self) -> i64 {
        let remaining = self.budget.saturating_sub(self.started.elapsed());
        i64::try_from(remaining.as_millis()).unwrap_or(i64::MAX)
    }
}

/// Executor that runs tasks until the supplied deadline probe says to yield.
///
/// A plain [`Executor::activate`] has no probe and therefore yields immediately, requesting another
/// activation. Triggers driving this executor are expected to call
/// [`Executor::activate_with_deadline`].
pub struct DeadlineBasedExecutor {
    core: ExecutorCore,
}

impl DeadlineBasedExecutor {
    /// Create an executor with the given activation trigger.
    #[must_use]
    pub fn new(
        config: &SchedulerConfig,
        trigger: Arc<dyn ActivationTrigger>,
        errors: Arc<UncaughtErrorRegistry>,
    ) -> Self {
        Self {
            core: ExecutorCore::new(config, trigger, errors),
        }
    }

    fn should_yield(probe: Option<&dyn DeadlineProbe>) -> bool {
        probe.is_none_or(|probe| probe.time_remaining() < MIN_TASK_TIME)
    }

    /// Run tasks until the deadline passes or the queue is empty.
    ///
    /// Requests another activation if tasks remain queued.
    pub fn execute_tasks(&self, probe: Option<&dyn DeadlineProbe>) {
        let mut queue_size = self.core.queue_size();
        while queue_size != 0 && !Self::should_yield(probe) {
            self.core.execute_next_task();
            queue_size = self.core.queue_size();
        }
        if queue_size != 0 {
            tracing::trace!(remaining = queue_size, "deadline reached with tasks queued");
            self.core.schedule_for_activation();
        }
    }
}

impl Executor for DeadlineBasedExecutor {
    fn core(&self) -> &ExecutorCore {
        &self.core
    }

    fn activate(&self) -> Result<(), SchedulerError> {
        self.core.context()?.activate(&mut || {
            self.execute_tasks(None);
            Ok(())
        })
    }

    fn activate_with_deadline(&self, probe: &dyn DeadlineProbe) -> Result<(), SchedulerError> {
        self.core.context()?.activate(&mut || {
            self.execute_tasks(Some(probe));
            Ok(())
        })
    }
}

impl std::fmt::Debug for DeadlineBasedExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeadlineBasedExecutor")
            .field("queue_size", &self.core.queue_size())
            .finish()
    }
}
