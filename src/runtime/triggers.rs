//! Built-in activation triggers.
//!
//! A trigger decides when a VPU runs: it receives an [`Activation`] whenever the VPU's queue
//! becomes non-empty (or a deadline-based executor yields with work left) and must run it once,
//! later, outside the caller's stack.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::error::SchedulerError;
use crate::core::executor::{Activation, ActivationTrigger, TimeBudget};
use crate::core::task::Task;
use crate::core::temporal::TemporalScheduler;

fn deferred<F>(activation: Activation, run: F) -> Task
where
    F: Fn(Activation) -> Result<(), SchedulerError> + Send + Sync + 'static,
{
    let slot = Mutex::new(Some(activation));
    Task::fallible(move || {
        if let Some(activation) = slot.lock().take() {
            run(activation)?;
        }
        Ok(())
    })
}

/// Activates through a zero-delay temporal task, on the timer thread.
#[derive(Debug)]
pub struct TimerTrigger {
    temporal: Arc<TemporalScheduler>,
}

impl TimerTrigger {
    /// Trigger scheduling activations on `temporal`.
    #[must_use]
    pub const fn new(temporal: Arc<TemporalScheduler>) -> Self {
        Self { temporal }
    }
}

impl ActivationTrigger for TimerTrigger {
    fn schedule(&self, activation: Activation) {
        let task = deferred(activation, Activation::run);
        if let Err(error) = self.temporal.delayed_task(None, task, 0) {
            tracing::error!(error = %error, "failed to schedule activation");
        }
    }
}

/// Activates through a zero-delay temporal task with a fixed remaining-time budget.
#[derive(Debug)]
pub struct IdleTrigger {
    temporal: Arc<TemporalScheduler>,
    budget_ms: u64,
}

impl IdleTrigger {
    /// Trigger granting each activation `budget_ms` milliseconds.
    #[must_use]
    pub const fn new(temporal: Arc<TemporalScheduler>, budget_ms: u64) -> Self {
        Self { temporal, budget_ms }
    }
}

impl ActivationTrigger for IdleTrigger {
    fn schedule(&self, activation: Activation) {
        let budget_ms = self.budget_ms;
        let task = deferred(activation, move |activation| {
            activation.run_with_deadline(&TimeBudget::new(budget_ms))
        });
        if let Err(error) = self.temporal.delayed_task(None, task, 0) {
            tracing::error!(error = %error, "failed to schedule idle activation");
        }
    }
}

/// Collects activations for an external loop to run, e.g. once per rendered frame.
#[derive(Debug, Default)]
pub struct ManualTrigger {
    pending: Mutex<VecDeque<Activation>>,
}

impl ManualTrigger {
    /// An empty trigger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of activations waiting to run.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    /// Run the activations pending at the time of the call. Activations requested meanwhile
    /// wait for the next call.
    ///
    /// # Errors
    ///
    /// The first error returned by an activation; activations not yet run stay pending.
    pub fn run_pending(&self) -> Result<usize, SchedulerError> {
        let count = self.pending();
        for ran in 0..count {
            let Some(activation) = self.pending.lock().pop_front() else {
                return Ok(ran);
            };
            activation.run()?;
        }
        Ok(count)
    }

    /// Run pending activations until none remain, at most `max_passes` times.
    ///
    /// # Errors
    ///
    /// The first error returned by an activation.
    pub fn run_until_idle(&self, max_passes: usize) -> Result<usize, SchedulerError> {
        let mut total = 0;
        for _ in 0..max_passes {
            if self.pending() == 0 {
                break;
            }
            total += self.run_pending()?;
        }
        Ok(total)
    }
}

impl ActivationTrigger for ManualTrigger {
    fn schedule(&self, activation: Activation) {
        self.pending.lock().push_back(activation);
    }
}
