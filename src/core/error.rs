//! Error types for scheduler operations.

use thiserror::Error;

/// Errors produced by scheduler components.
///
/// Every variant except [`SchedulerError::Unbound`] and [`SchedulerError::Backend`] is an
/// invariant failure: a caller bug that is only detected while invariant checking is enabled.
/// The `Display` output starts with the stable identifier returned by [`SchedulerError::code`].
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A task was queued while the same callback is still queued in that executor.
    #[error("duplicate-task-enqueue: attempting to queue task {task} when task is already queued")]
    DuplicateTaskEnqueue {
        /// Diagnostic name of the offending task.
        task: String,
    },
    /// A VPU was activated while another VPU is active.
    #[error(
        "duplicate-vpu-activation: attempting to activate VirtualProcessorUnit named '{unit}' but an existing VirtualProcessorUnit named '{active}' is activated"
    )]
    DuplicateVpuActivation {
        /// The unit being activated.
        unit: String,
        /// The unit that is already active.
        active: String,
    },
    /// A VPU was deactivated while it was not the active unit.
    #[error(
        "vpu-deactivated-without-being-active: attempting to deactivate VirtualProcessorUnit named '{unit}' but no VirtualProcessorUnit is activated"
    )]
    VpuNotActive {
        /// The unit being deactivated.
        unit: String,
    },
    /// A name was supplied while diagnostic names are disabled.
    #[error("name-supplied-while-names-disabled: VirtualProcessorUnit passed a name '{name}' but names are disabled")]
    NameWhileNamesDisabled {
        /// The name that was supplied.
        name: String,
    },
    /// An uncaught error handler was registered twice.
    #[error("duplicate-error-handler-registration: attempting to add a handler that is already in the list of error handlers")]
    DuplicateErrorHandler,
    /// An uncaught error handler was removed without being registered.
    #[error("missing-error-handler-on-removal: attempting to remove a handler that is not in the list of error handlers")]
    MissingErrorHandler,
    /// A delayed task was scheduled with a negative delay.
    #[error("negative-delay: delayed task named '{task}' passed a negative delay. Actual value passed is {delay}")]
    NegativeDelay {
        /// Diagnostic name of the task.
        task: String,
        /// The rejected delay.
        delay: i64,
    },
    /// A periodic task was scheduled with a period that is zero or negative.
    #[error("non-positive-period: periodic task named '{task}' passed a non-positive period. Actual value passed is {period}")]
    NonPositivePeriod {
        /// Diagnostic name of the task.
        task: String,
        /// The rejected period.
        period: i64,
    },
    /// Tasks kept re-scheduling themselves past the round budget.
    #[error(
        "runaway-tasks-detected: tasks still running after {max_rounds} rounds. Current tasks include: {tasks:?}"
    )]
    RunawayTasksDetected {
        /// The round budget that was exceeded.
        max_rounds: u32,
        /// Names of the tasks still queued when the budget ran out, front of the queue first.
        tasks: Vec<String>,
    },
    /// The default phase was re-entered while a VPU is active.
    #[error(
        "reentrant-activation-while-vpu-active: run-now invoked for the task named '{task}' but the VirtualProcessorUnit named '{active}' is already active"
    )]
    ReentrantActivation {
        /// Diagnostic name of the task.
        task: String,
        /// The unit that is already active.
        active: String,
    },
    /// The uncaught error registry was accessed while handlers are disabled.
    #[error("error-registry-accessed-while-disabled: uncaught error handlers are disabled")]
    ErrorRegistryDisabled,
    /// An executor was activated before it was attached to a VPU.
    #[error("executor is not bound to a VirtualProcessorUnit")]
    Unbound,
    /// Timer backend failure with context.
    #[error("backend error: {0}")]
    Backend(String),
}

impl SchedulerError {
    /// Stable identifier of the failure category, for fixtures and user-facing messages.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::DuplicateTaskEnqueue { .. } => "duplicate-task-enqueue",
            Self::DuplicateVpuActivation { .. } => "duplicate-vpu-activation",
            Self::VpuNotActive { .. } => "vpu-deactivated-without-being-active",
            Self::NameWhileNamesDisabled { .. } => "name-supplied-while-names-disabled",
            Self::DuplicateErrorHandler => "duplicate-error-handler-registration",
            Self::MissingErrorHandler => "missing-error-handler-on-removal",
            Self::NegativeDelay { .. } => "negative-delay",
            Self::NonPositivePeriod { .. } => "non-positive-period",
            Self::RunawayTasksDetected { .. } => "runaway-tasks-detected",
            Self::ReentrantActivation { .. } => "reentrant-activation-while-vpu-active",
            Self::ErrorRegistryDisabled => "error-registry-accessed-while-disabled",
            Self::Unbound => "unbound-executor",
            Self::Backend(_) => "backend",
        }
    }
}

/// A failure that escaped a task callback and was captured instead of propagating.
#[derive(Debug, Error)]
pub enum UncaughtError {
    /// The callback returned an error.
    #[error("task failed: {0:#}")]
    Failed(#[from] anyhow::Error),
    /// The callback panicked; the payload is the panic message when it was a string.
    #[error("task panicked: {0}")]
    Panicked(String),
}

impl UncaughtError {
    /// Build from a payload captured by `std::panic::catch_unwind`.
    #[must_use]
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        Self::Panicked(message)
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
