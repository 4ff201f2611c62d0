//! Executor abstraction shared by every phase.
//!
//! An executor owns one task queue and decides how queued work is drained when its VPU is
//! activated. Two strategies exist:
//!
//! - [`RoundBasedExecutor`]: drains the queue in rounds and detects runaway re-scheduling.
//! - [`DeadlineBasedExecutor`]: runs tasks while a deadline probe reports remaining time.
//!
//! Both build on [`ExecutorCore`], which implements the common contract: rejecting a task that is
//! already queued, requesting activation from the injected [`ActivationTrigger`] when the queue
//! becomes non-empty, and running tasks one at a time with failures forwarded to the
//! [`UncaughtErrorRegistry`] instead of propagating.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use prometheus_vpu::config::SchedulerConfig;
//! use prometheus_vpu::core::{RoundBasedExecutor, Task, UncaughtErrorRegistry};
//! use prometheus_vpu::runtime::ManualTrigger;
//!
//! let config = SchedulerConfig::development();
//! let trigger = Arc::new(ManualTrigger::new());
//! let errors = Arc::new(UncaughtErrorRegistry::new(true, true));
//! let executor = Arc::new(RoundBasedExecutor::new(&config, trigger.clone(), errors));
//!
//! executor.queue(Some("greet"), Task::new(|| println!("hello")))?;
//! assert_eq!(trigger.pending(), 1);
//! ```

mod deadline_based;
mod round_based;

use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;

use crate::config::SchedulerConfig;
use crate::core::error::SchedulerError;
use crate::core::ring_buffer::RingBuffer;
use crate::core::task::{Cancelable, Task, TaskEntry};
use crate::core::uncaught::UncaughtErrorRegistry;

pub use deadline_based::{DeadlineBasedExecutor, DeadlineProbe, TimeBudget, MIN_TASK_TIME};
pub use round_based::RoundBasedExecutor;

/// Capacity of a task queue when created and after [`Executor::reset`].
pub const INITIAL_QUEUE_SIZE: usize = 100;

/// Executor strategy selectable per VPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorKind {
    /// Fair round-based draining with runaway detection.
    RoundBased,
    /// Cooperative time slicing against a deadline probe.
    DeadlineBased,
}

/// Capability handed to an executor by its VPU: run a drive loop under the single-active-unit
/// discipline.
pub trait ActivationContext: Send + Sync {
    /// Mark the owning unit active, run `activation`, then mark it inactive.
    ///
    /// # Errors
    ///
    /// Propagates mutual-exclusion violations and any error returned by `activation`.
    fn activate(
        &self,
        activation: &mut dyn FnMut() -> Result<(), SchedulerError>,
    ) -> Result<(), SchedulerError>;
}

/// Context that runs the activation directly, without any mutual exclusion.
///
/// Useful for driving a standalone executor that is not part of a VPU.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassThroughContext;

impl ActivationContext for PassThroughContext {
    fn activate(
        &self,
        activation: &mut dyn FnMut() -> Result<(), SchedulerError>,
    ) -> Result<(), SchedulerError> {
        activation()
    }
}

/// A pending request to activate an executor, handed to an [`ActivationTrigger`].
pub struct Activation {
    executor: Weak<dyn Executor>,
}

impl Activation {
    /// Activate the executor. A no-op if it has been dropped.
    ///
    /// # Errors
    ///
    /// Propagates errors from the executor's drive loop (e.g. runaway tasks).
    pub fn run(self) -> Result<(), SchedulerError> {
        self.executor.upgrade().map_or(Ok(()), |executor| executor.activate())
    }

    /// Activate the executor with a remaining-time probe supplied by the trigger.
    ///
    /// # Errors
    ///
    /// Propagates errors from the executor's drive loop.
    pub fn run_with_deadline(self, probe: &dyn DeadlineProbe) -> Result<(), SchedulerError> {
        self.executor
            .upgrade()
            .map_or(Ok(()), |executor| executor.activate_with_deadline(probe))
    }
}

impl fmt::Debug for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Activation")
            .field("live", &(self.executor.strong_count() > 0))
            .finish()
    }
}

/// The one capability each phase trigger provides: invoke an activation once, asynchronously,
/// no earlier than the trigger's condition.
pub trait ActivationTrigger: Send + Sync {
    /// Arrange for `activation` to run later.
    fn schedule(&self, activation: Activation);
}

/// Common executor interface, implemented by both strategies.
pub trait Executor: Send + Sync {
    /// Shared queue and contract.
    fn core(&self) -> &ExecutorCore;

    /// Drive queued tasks under the bound activation context.
    ///
    /// # Errors
    ///
    /// Mutual-exclusion violations, runaway detection, or [`SchedulerError::Unbound`].
    fn activate(&self) -> Result<(), SchedulerError>;

    /// Drive queued tasks with a remaining-time probe. Strategies without a notion of deadline
    /// ignore the probe.
    ///
    /// # Errors
    ///
    /// Same as [`Executor::activate`].
    fn activate_with_deadline(&self, _probe: &dyn DeadlineProbe) -> Result<(), SchedulerError> {
        self.activate()
    }

    /// Queue a task at the back, requesting activation if the queue was empty.
    ///
    /// # Errors
    ///
    /// `DuplicateTaskEnqueue` if the callback is already queued.
    fn queue(&self, name: Option<&str>, task: Task) -> Result<Cancelable, SchedulerError> {
        self.core().queue(name, task)
    }

    /// Queue a task at the front without requesting activation.
    ///
    /// # Errors
    ///
    /// `DuplicateTaskEnqueue` if the callback is already queued.
    fn queue_next(&self, name: Option<&str>, task: Task) -> Result<Cancelable, SchedulerError> {
        self.core().queue_next(name, task)
    }

    /// Number of queued entries, including cancelled ones not yet popped.
    fn queue_size(&self) -> usize {
        self.core().queue_size()
    }

    /// Teardown only: empty the queue and shrink it to the initial capacity.
    fn reset(&self) {
        self.core().reset();
    }
}

struct Binding {
    context: Arc<dyn ActivationContext>,
    this: Weak<dyn Executor>,
}

/// Queue and behavior shared by every executor strategy.
pub struct ExecutorCore {
    queue: Mutex<RingBuffer<Arc<TaskEntry>>>,
    trigger: Arc<dyn ActivationTrigger>,
    errors: Arc<UncaughtErrorRegistry>,
    check_invariants: bool,
    binding: OnceLock<Binding>,
}

impl ExecutorCore {
    /// Create the core with the trigger used to request activations.
    #[must_use]
    pub fn new(
        config: &SchedulerConfig,
        trigger: Arc<dyn ActivationTrigger>,
        errors: Arc<UncaughtErrorRegistry>,
    ) -> Self {
        Self {
            queue: Mutex::new(RingBuffer::new(INITIAL_QUEUE_SIZE)),
            trigger,
            errors,
            check_invariants: config.check_invariants,
            binding: OnceLock::new(),
        }
    }

    /// Attach the executor to its activation context. Only the first binding takes effect.
    ///
    /// `this` must point at the executor owning this core; triggers use it to activate later.
    pub fn bind(&self, context: Arc<dyn ActivationContext>, this: Weak<dyn Executor>) {
        if self.binding.set(Binding { context, this }).is_err() {
            tracing::warn!("executor already bound to an activation context");
        }
    }

    /// True once [`ExecutorCore::bind`] has been called.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.binding.get().is_some()
    }

    pub(crate) fn context(&self) -> Result<&dyn ActivationContext, SchedulerError> {
        self.binding
            .get()
            .map(|binding| binding.context.as_ref())
            .ok_or(SchedulerError::Unbound)
    }

    /// Ask the trigger for another activation.
    pub(crate) fn schedule_for_activation(&self) {
        let this: Weak<dyn Executor> = match self.binding.get() {
            Some(binding) => binding.this.clone(),
            None => {
                tracing::debug!("activation requested for an unbound executor");
                Weak::<RoundBasedExecutor>::new()
            }
        };
        self.trigger.schedule(Activation { executor: this });
    }

    /// Number of queued entries.
    #[must_use]
    pub fn queue_size(&self) -> usize {
        self.queue.lock().size()
    }

    /// Display names of queued entries, front first.
    #[must_use]
    pub fn queued_task_names(&self) -> Vec<String> {
        self.queue.lock().iter().map(ToString::to_string).collect()
    }

    fn ensure_not_queued(
        &self,
        queue: &RingBuffer<Arc<TaskEntry>>,
        name: Option<&str>,
        task: &Task,
    ) -> Result<(), SchedulerError> {
        if self.check_invariants && queue.iter().any(|entry| entry.holds(task)) {
            return Err(SchedulerError::DuplicateTaskEnqueue {
                task: name.map_or_else(|| format!("{task:?}"), ToString::to_string),
            });
        }
        Ok(())
    }

    /// Append a task; requests activation if the queue was empty.
    ///
    /// # Errors
    ///
    /// `DuplicateTaskEnqueue` if the callback is already queued.
    pub fn queue(&self, name: Option<&str>, task: Task) -> Result<Cancelable, SchedulerError> {
        let (entry, needs_activation) = {
            let mut queue = self.queue.lock();
            self.ensure_not_queued(&queue, name, &task)?;
            let was_empty = queue.is_empty();
            let entry = Arc::new(TaskEntry::with_cancel_action(name.map(ToString::to_string), task, None));
            queue.push(Arc::clone(&entry));
            (entry, was_empty)
        };
        tracing::debug!(task = %entry, "task queued");
        if needs_activation {
            self.schedule_for_activation();
        }
        Ok(Cancelable::new(&entry))
    }

    /// Insert a task at the front. Never requests activation.
    ///
    /// # Errors
    ///
    /// `DuplicateTaskEnqueue` if the callback is already queued.
    pub fn queue_next(&self, name: Option<&str>, task: Task) -> Result<Cancelable, SchedulerError> {
        let mut queue = self.queue.lock();
        self.ensure_not_queued(&queue, name, &task)?;
        let entry = Arc::new(TaskEntry::with_cancel_action(name.map(ToString::to_string), task, None));
        queue.push_front(Arc::clone(&entry));
        Ok(Cancelable::new(&entry))
    }

    /// Pop and run one task. Failures go to the uncaught error registry.
    ///
    /// Returns false if the queue was empty.
    pub fn execute_next_task(&self) -> bool {
        // The lock is released before the task runs so the task may queue more work
        let Some(entry) = self.queue.lock().pop() else {
            return false;
        };
        if let Err(error) = entry.execute() {
            tracing::debug!(task = %entry, error = %error, "task failed");
            self.errors.report(&error);
        }
        true
    }

    /// Empty the queue without shrinking it.
    pub fn clear(&self) {
        self.queue.lock().clear();
    }

    /// Empty the queue and shrink it to the initial capacity.
    pub fn reset(&self) {
        let mut queue = self.queue.lock();
        queue.clear();
        queue.truncate(INITIAL_QUEUE_SIZE);
    }

    /// Current capacity of the task queue.
    #[must_use]
    pub fn queue_capacity(&self) -> usize {
        self.queue.lock().capacity()
    }
}

impl fmt::Debug for ExecutorCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorCore")
            .field("queue_size", &self.queue_size())
            .field("bound", &self.is_bound())
            .finish()
    }
}
