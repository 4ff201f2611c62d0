//! The scheduler facade: one VPU per phase, timers and uncaught error handling.

use std::sync::{Arc, Weak};

use crate::config::SchedulerConfig;
use crate::core::error::{SchedulerError, UncaughtError};
use crate::core::executor::Executor;
use crate::core::task::{Cancelable, Task};
use crate::core::temporal::TemporalScheduler;
use crate::core::uncaught::{SharedErrorHandler, UncaughtErrorRegistry};
use crate::core::vpu::{ActivationRegistry, VirtualProcessorUnit, VpuInfo};
use crate::builders::SchedulerBuilder;
use crate::util::NameGenerator;

use super::phase::Phase;

const DELAYED_TASK_PREFIX: &str = "DelayedTask";
const PERIODIC_TASK_PREFIX: &str = "PeriodicTask";

pub(crate) struct SchedulerInner {
    pub(crate) config: SchedulerConfig,
    pub(crate) registry: Arc<ActivationRegistry>,
    pub(crate) errors: Arc<UncaughtErrorRegistry>,
    pub(crate) temporal: Arc<TemporalScheduler>,
    pub(crate) vpus: Vec<VirtualProcessorUnit>,
    pub(crate) names: NameGenerator,
}

impl SchedulerInner {
    fn vpu(&self, phase: Phase) -> &VirtualProcessorUnit {
        &self.vpus[phase.index()]
    }

    fn become_default_phase_task(&self, name: Option<&str>, task: Task) -> Result<(), SchedulerError> {
        self.registry.exclusive(|| {
            if self.config.check_invariants {
                if let Some(active) = self.registry.current_vpu() {
                    return Err(SchedulerError::ReentrantActivation {
                        task: name.unwrap_or("<anonymous>").to_string(),
                        active: active.to_string(),
                    });
                }
            }
            let executor = self.vpu(Phase::default()).executor();
            executor.queue_next(name, task)?;
            executor.activate()
        })
    }
}

/// Cooperative scheduler multiplexing tasks onto five phase VPUs.
///
/// Cloning is cheap and every clone drives the same VPUs.
///
/// ```rust,ignore
/// use prometheus_vpu::config::SchedulerConfig;
/// use prometheus_vpu::core::Task;
/// use prometheus_vpu::runtime::Scheduler;
///
/// let scheduler = Scheduler::new(SchedulerConfig::development())?;
/// scheduler.macro_task(Task::new(|| println!("next macro task")))?;
/// let poll = scheduler.periodic_task_named("Poll", Task::new(|| println!("tick")), 1_000)?;
/// poll.cancel();
/// scheduler.shutdown();
/// ```
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    /// Build a scheduler with the default triggers.
    ///
    /// # Errors
    ///
    /// `Backend` if the configuration is invalid or a timer thread cannot start.
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        SchedulerBuilder::new(config).build()
    }

    /// Start configuring a scheduler.
    #[must_use]
    pub fn builder(config: SchedulerConfig) -> SchedulerBuilder {
        SchedulerBuilder::new(config)
    }

    pub(crate) fn from_inner(inner: SchedulerInner) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Queue a task on `phase`, generating a name when names are enabled and none is given.
    ///
    /// # Errors
    ///
    /// `DuplicateTaskEnqueue` if the callback is already queued on that phase.
    pub fn queue(&self, phase: Phase, name: Option<&str>, task: Task) -> Result<Cancelable, SchedulerError> {
        let name = self.inner.names.generate(phase.task_prefix(), name);
        self.inner.vpu(phase).queue(name.as_deref(), task)
    }

    /// Queue a task on the macro task phase.
    ///
    /// # Errors
    ///
    /// `DuplicateTaskEnqueue` if the callback is already queued.
    pub fn macro_task(&self, task: Task) -> Result<Cancelable, SchedulerError> {
        self.queue(Phase::MacroTask, None, task)
    }

    /// Named variant of [`Scheduler::macro_task`].
    ///
    /// # Errors
    ///
    /// `DuplicateTaskEnqueue` if the callback is already queued.
    pub fn macro_task_named(&self, name: &str, task: Task) -> Result<Cancelable, SchedulerError> {
        self.queue(Phase::MacroTask, Some(name), task)
    }

    /// Queue a task on the micro task phase.
    ///
    /// # Errors
    ///
    /// `DuplicateTaskEnqueue` if the callback is already queued.
    pub fn micro_task(&self, task: Task) -> Result<Cancelable, SchedulerError> {
        self.queue(Phase::MicroTask, None, task)
    }

    /// Named variant of [`Scheduler::micro_task`].
    ///
    /// # Errors
    ///
    /// `DuplicateTaskEnqueue` if the callback is already queued.
    pub fn micro_task_named(&self, name: &str, task: Task) -> Result<Cancelable, SchedulerError> {
        self.queue(Phase::MicroTask, Some(name), task)
    }

    /// Queue a task to run before the next frame.
    ///
    /// # Errors
    ///
    /// `DuplicateTaskEnqueue` if the callback is already queued.
    pub fn animation_frame(&self, task: Task) -> Result<Cancelable, SchedulerError> {
        self.queue(Phase::AnimationFrame, None, task)
    }

    /// Named variant of [`Scheduler::animation_frame`].
    ///
    /// # Errors
    ///
    /// `DuplicateTaskEnqueue` if the callback is already queued.
    pub fn animation_frame_named(&self, name: &str, task: Task) -> Result<Cancelable, SchedulerError> {
        self.queue(Phase::AnimationFrame, Some(name), task)
    }

    /// Queue a task to run after the next frame.
    ///
    /// # Errors
    ///
    /// `DuplicateTaskEnqueue` if the callback is already queued.
    pub fn after_frame(&self, task: Task) -> Result<Cancelable, SchedulerError> {
        self.queue(Phase::AfterFrame, None, task)
    }

    /// Named variant of [`Scheduler::after_frame`].
    ///
    /// # Errors
    ///
    /// `DuplicateTaskEnqueue` if the callback is already queued.
    pub fn after_frame_named(&self, name: &str, task: Task) -> Result<Cancelable, SchedulerError> {
        self.queue(Phase::AfterFrame, Some(name), task)
    }

    /// Queue a task for the next idle period.
    ///
    /// # Errors
    ///
    /// `DuplicateTaskEnqueue` if the callback is already queued.
    pub fn on_idle(&self, task: Task) -> Result<Cancelable, SchedulerError> {
        self.queue(Phase::OnIdle, None, task)
    }

    /// Named variant of [`Scheduler::on_idle`].
    ///
    /// # Errors
    ///
    /// `DuplicateTaskEnqueue` if the callback is already queued.
    pub fn on_idle_named(&self, name: &str, task: Task) -> Result<Cancelable, SchedulerError> {
        self.queue(Phase::OnIdle, Some(name), task)
    }

    fn reentering(&self, name: Option<String>, task: Task) -> Task {
        let inner: Weak<SchedulerInner> = Arc::downgrade(&self.inner);
        Task::fallible(move || {
            if let Some(inner) = inner.upgrade() {
                inner.become_default_phase_task(name.as_deref(), task.clone())?;
            }
            Ok(())
        })
    }

    /// Run `task` in the default phase after `delay` milliseconds.
    ///
    /// # Errors
    ///
    /// `NegativeDelay` when invariant checking is on, `Backend` if the timer backend stopped.
    pub fn delayed_task(&self, task: Task, delay: i64) -> Result<Cancelable, SchedulerError> {
        self.schedule_delayed(None, task, delay)
    }

    /// Named variant of [`Scheduler::delayed_task`].
    ///
    /// # Errors
    ///
    /// Same as [`Scheduler::delayed_task`].
    pub fn delayed_task_named(&self, name: &str, task: Task, delay: i64) -> Result<Cancelable, SchedulerError> {
        self.schedule_delayed(Some(name), task, delay)
    }

    fn schedule_delayed(&self, name: Option<&str>, task: Task, delay: i64) -> Result<Cancelable, SchedulerError> {
        self.inner.temporal.check_delay(name, delay)?;
        let name = self.inner.names.generate(DELAYED_TASK_PREFIX, name);
        let wrapper = self.reentering(name.clone(), task);
        self.inner.temporal.delayed_task(name.as_deref(), wrapper, delay)
    }

    /// Run `task` in the default phase every `period` milliseconds, starting now.
    ///
    /// # Errors
    ///
    /// `NonPositivePeriod` when invariant checking is on, `Backend` if the timer backend stopped.
    pub fn periodic_task(&self, task: Task, period: i64) -> Result<Cancelable, SchedulerError> {
        self.schedule_periodic(None, task, period)
    }

    /// Named variant of [`Scheduler::periodic_task`].
    ///
    /// # Errors
    ///
    /// Same as [`Scheduler::periodic_task`].
    pub fn periodic_task_named(&self, name: &str, task: Task, period: i64) -> Result<Cancelable, SchedulerError> {
        self.schedule_periodic(Some(name), task, period)
    }

    fn schedule_periodic(&self, name: Option<&str>, task: Task, period: i64) -> Result<Cancelable, SchedulerError> {
        self.inner.temporal.check_period(name, period)?;
        let name = self.inner.names.generate(PERIODIC_TASK_PREFIX, name);
        let wrapper = self.reentering(name.clone(), task);
        self.inner.temporal.periodic_task(name.as_deref(), wrapper, period)
    }

    /// Run `task` now as the first task of a fresh default-phase activation. Tasks already queued
    /// in the default phase run after it, in the same activation.
    ///
    /// # Errors
    ///
    /// `ReentrantActivation` if a VPU is active, plus any error of the activation itself.
    pub fn become_default_phase_task(&self, name: Option<&str>, task: Task) -> Result<(), SchedulerError> {
        self.inner.become_default_phase_task(name, task)
    }

    /// Milliseconds since the scheduler started.
    #[must_use]
    pub fn now(&self) -> u64 {
        self.inner.temporal.now()
    }

    /// True while a VPU is active.
    #[must_use]
    pub fn is_vpu_activated(&self) -> bool {
        self.inner.registry.is_vpu_activated()
    }

    /// The active VPU, if any.
    #[must_use]
    pub fn current_vpu(&self) -> Option<Arc<VpuInfo>> {
        self.inner.registry.current_vpu()
    }

    /// The VPU serving `phase`.
    #[must_use]
    pub fn vpu(&self, phase: Phase) -> &VirtualProcessorUnit {
        self.inner.vpu(phase)
    }

    /// The default phase's VPU.
    #[must_use]
    pub fn macro_task_vpu(&self) -> &VirtualProcessorUnit {
        self.vpu(Phase::MacroTask)
    }

    /// The micro task VPU.
    #[must_use]
    pub fn micro_task_vpu(&self) -> &VirtualProcessorUnit {
        self.vpu(Phase::MicroTask)
    }

    /// The animation frame VPU.
    #[must_use]
    pub fn animation_frame_vpu(&self) -> &VirtualProcessorUnit {
        self.vpu(Phase::AnimationFrame)
    }

    /// The after frame VPU.
    #[must_use]
    pub fn after_frame_vpu(&self) -> &VirtualProcessorUnit {
        self.vpu(Phase::AfterFrame)
    }

    /// The idle VPU.
    #[must_use]
    pub fn on_idle_vpu(&self) -> &VirtualProcessorUnit {
        self.vpu(Phase::OnIdle)
    }

    /// The uncaught error registry shared by every VPU and timer backend.
    #[must_use]
    pub fn uncaught_errors(&self) -> &Arc<UncaughtErrorRegistry> {
        &self.inner.errors
    }

    /// Register a handler for errors escaping task callbacks.
    ///
    /// # Errors
    ///
    /// `DuplicateErrorHandler` or `ErrorRegistryDisabled` when invariant checking is on.
    pub fn add_uncaught_error_handler(&self, handler: SharedErrorHandler) -> Result<(), SchedulerError> {
        self.inner.errors.add(handler)
    }

    /// Unregister a handler.
    ///
    /// # Errors
    ///
    /// `MissingErrorHandler` or `ErrorRegistryDisabled` when invariant checking is on.
    pub fn remove_uncaught_error_handler(&self, handler: &SharedErrorHandler) -> Result<(), SchedulerError> {
        self.inner.errors.remove(handler)
    }

    /// Deliver `error` to the registered handlers. Dropped when handlers are disabled.
    pub fn report_uncaught_error(&self, error: &UncaughtError) {
        self.inner.errors.report(error);
    }

    /// Teardown only: clear the current VPU, empty every phase queue and restart name numbering.
    pub fn reset(&self) {
        self.inner.registry.reset();
        for vpu in &self.inner.vpus {
            vpu.executor().reset();
        }
        self.inner.names.reset();
    }

    /// Stop the timer backend. Pending delayed and periodic tasks never fire.
    ///
    /// Called from outside any activation this also waits for the timer threads to exit. Called
    /// from a running task it only signals, since a timer thread may be waiting on the activation
    /// gate the caller holds.
    pub fn shutdown(&self) {
        self.inner.temporal.shutdown();
        if self.inner.registry.holds_gate() {
            tracing::debug!("shutdown requested inside an activation, timer threads not joined");
            return;
        }
        self.inner.temporal.join();
        tracing::info!("scheduler shut down");
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("vpus", &self.inner.vpus)
            .field("current", &self.current_vpu().map(|vpu| vpu.to_string()))
            .finish_non_exhaustive()
    }
}
