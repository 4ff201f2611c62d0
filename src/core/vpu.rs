//! Virtual processor units and the registry enforcing that only one of them runs at a time.
//!
//! The [`ActivationRegistry`] is the single piece of shared mutable state in the scheduler: a
//! "current VPU or none" cell. Activations on different threads are serialized by a re-entrant
//! gate, so an activation attempted from inside another activation on the same thread reaches the
//! invariant check instead of deadlocking.

use std::fmt;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};

use crate::core::error::SchedulerError;
use crate::core::executor::{ActivationContext, Executor};
use crate::core::task::{Cancelable, Task};

/// Identity and diagnostic name of a VPU.
#[derive(Debug)]
pub struct VpuInfo {
    id: u64,
    name: Option<String>,
}

impl VpuInfo {
    /// Process-unique identifier assigned by the registry.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Diagnostic name, present only when names are enabled.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl fmt::Display for VpuInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => f.write_str(name),
            None => write!(f, "VirtualProcessorUnit@{}", self.id),
        }
    }
}

/// Tracks the currently active VPU.
pub struct ActivationRegistry {
    gate: ReentrantMutex<()>,
    current: Mutex<Option<Arc<VpuInfo>>>,
    check_invariants: bool,
    next_id: AtomicU64,
}

impl ActivationRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new(check_invariants: bool) -> Self {
        Self {
            gate: ReentrantMutex::new(()),
            current: Mutex::new(None),
            check_invariants,
            next_id: AtomicU64::new(1),
        }
    }

    fn register(&self, name: Option<String>) -> Arc<VpuInfo> {
        Arc::new(VpuInfo {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            name,
        })
    }

    /// True while some VPU is active.
    #[must_use]
    pub fn is_vpu_activated(&self) -> bool {
        self.current.lock().is_some()
    }

    /// The active VPU, if any.
    #[must_use]
    pub fn current_vpu(&self) -> Option<Arc<VpuInfo>> {
        self.current.lock().clone()
    }

    /// Mark `unit` as current.
    ///
    /// A nested or cross-unit activation fails here with `DuplicateVpuActivation`. Running a task
    /// as the default phase while any unit is current is rejected earlier, by
    /// [`Scheduler::become_default_phase_task`](crate::runtime::Scheduler::become_default_phase_task),
    /// with `ReentrantActivation`.
    ///
    /// # Errors
    ///
    /// `DuplicateVpuActivation` if another unit is current and invariant checking is on.
    pub fn activate_unit(&self, unit: &Arc<VpuInfo>) -> Result<(), SchedulerError> {
        let mut current = self.current.lock();
        if self.check_invariants {
            if let Some(active) = current.as_ref() {
                return Err(SchedulerError::DuplicateVpuActivation {
                    unit: unit.to_string(),
                    active: active.to_string(),
                });
            }
        }
        *current = Some(Arc::clone(unit));
        Ok(())
    }

    /// Clear the current unit.
    ///
    /// # Errors
    ///
    /// `VpuNotActive` if `unit` is not current and invariant checking is on.
    pub fn deactivate_unit(&self, unit: &Arc<VpuInfo>) -> Result<(), SchedulerError> {
        let mut current = self.current.lock();
        if self.check_invariants
            && !current
                .as_ref()
                .is_some_and(|active| Arc::ptr_eq(active, unit))
        {
            return Err(SchedulerError::VpuNotActive {
                unit: unit.to_string(),
            });
        }
        *current = None;
        Ok(())
    }

    /// Make `unit` current for the duration of `activation`.
    ///
    /// The unit is deactivated whether `activation` succeeds, fails or panics. A panic is resumed
    /// after deactivation.
    ///
    /// # Errors
    ///
    /// Mutual-exclusion violations, or the error returned by `activation`.
    pub fn activate(
        &self,
        unit: &Arc<VpuInfo>,
        activation: &mut dyn FnMut() -> Result<(), SchedulerError>,
    ) -> Result<(), SchedulerError> {
        let _gate = self.gate.lock();
        self.activate_unit(unit)?;
        tracing::debug!(vpu = %unit, "vpu activated");
        let outcome = catch_unwind(AssertUnwindSafe(activation));
        let deactivated = self.deactivate_unit(unit);
        tracing::debug!(vpu = %unit, "vpu deactivated");
        match outcome {
            Ok(result) => result.and(deactivated),
            Err(payload) => resume_unwind(payload),
        }
    }

    /// Run `f` while holding the activation gate, excluding activations on other threads.
    pub(crate) fn exclusive<R>(&self, f: impl FnOnce() -> R) -> R {
        let _gate = self.gate.lock();
        f()
    }

    /// Whether the calling thread holds the activation gate, i.e. runs inside an activation or an
    /// exclusive section.
    #[must_use]
    pub fn holds_gate(&self) -> bool {
        self.gate.is_owned_by_current_thread()
    }

    /// Teardown only: forget the current unit.
    pub fn reset(&self) {
        *self.current.lock() = None;
    }
}

impl fmt::Debug for ActivationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivationRegistry")
            .field("current", &self.current_vpu().map(|unit| unit.to_string()))
            .finish_non_exhaustive()
    }
}

struct UnitContext {
    unit: Arc<VpuInfo>,
    registry: Arc<ActivationRegistry>,
}

impl ActivationContext for UnitContext {
    fn activate(
        &self,
        activation: &mut dyn FnMut() -> Result<(), SchedulerError>,
    ) -> Result<(), SchedulerError> {
        self.registry.activate(&self.unit, activation)
    }
}

/// A named execution phase wrapping one executor.
pub struct VirtualProcessorUnit {
    info: Arc<VpuInfo>,
    executor: Arc<dyn Executor>,
}

impl VirtualProcessorUnit {
    /// Wrap `executor` and bind it to `registry` so its activations run under mutual exclusion.
    ///
    /// The name is kept only when `names_enabled` is set.
    ///
    /// # Errors
    ///
    /// `NameWhileNamesDisabled` if a name is passed while names are disabled and invariant
    /// checking is on.
    pub fn new(
        name: Option<&str>,
        executor: Arc<dyn Executor>,
        registry: &Arc<ActivationRegistry>,
        names_enabled: bool,
    ) -> Result<Self, SchedulerError> {
        if registry.check_invariants && !names_enabled {
            if let Some(name) = name {
                return Err(SchedulerError::NameWhileNamesDisabled {
                    name: name.to_string(),
                });
            }
        }
        let name = if names_enabled { name.map(ToString::to_string) } else { None };
        let info = registry.register(name);
        let context = Arc::new(UnitContext {
            unit: Arc::clone(&info),
            registry: Arc::clone(registry),
        });
        executor.core().bind(context, Arc::downgrade(&executor));
        Ok(Self { info, executor })
    }

    /// Diagnostic name, if names are enabled.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.info.name()
    }

    /// Identity of this unit, as reported by [`ActivationRegistry::current_vpu`].
    #[must_use]
    pub const fn info(&self) -> &Arc<VpuInfo> {
        &self.info
    }

    /// The executor driving this unit.
    #[must_use]
    pub const fn executor(&self) -> &Arc<dyn Executor> {
        &self.executor
    }

    /// Queue a task, requesting activation if the queue was empty.
    ///
    /// # Errors
    ///
    /// `DuplicateTaskEnqueue` if the callback is already queued on this unit.
    pub fn queue(&self, name: Option<&str>, task: Task) -> Result<Cancelable, SchedulerError> {
        self.executor.queue(name, task)
    }

    /// Activate the unit now.
    ///
    /// # Errors
    ///
    /// Mutual-exclusion violations and runaway detection.
    pub fn activate(&self) -> Result<(), SchedulerError> {
        self.executor.activate()
    }

    /// True if this unit is the one currently active in `registry`.
    #[must_use]
    pub fn is_current(&self, registry: &ActivationRegistry) -> bool {
        registry
            .current_vpu()
            .is_some_and(|current| Arc::ptr_eq(&current, &self.info))
    }
}

impl fmt::Display for VirtualProcessorUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.info.fmt(f)
    }
}

impl fmt::Debug for VirtualProcessorUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualProcessorUnit")
            .field("name", &self.info.to_string())
            .field("queue_size", &self.executor.queue_size())
            .finish()
    }
}
