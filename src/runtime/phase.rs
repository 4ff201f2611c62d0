//! Execution phases.

use crate::core::executor::ExecutorKind;

/// The execution phases served by the scheduler, one VPU each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Phase {
    /// Default phase; delayed and periodic tasks re-enter here when they fire.
    #[default]
    MacroTask,
    /// Runs at microtask boundaries.
    MicroTask,
    /// Runs before a frame is rendered.
    AnimationFrame,
    /// Runs after a frame is rendered.
    AfterFrame,
    /// Runs in idle periods, time sliced against a budget.
    OnIdle,
}

impl Phase {
    /// Every phase, in index order.
    pub const ALL: [Self; 5] = [
        Self::MacroTask,
        Self::MicroTask,
        Self::AnimationFrame,
        Self::AfterFrame,
        Self::OnIdle,
    ];

    /// Diagnostic name of the phase's VPU.
    #[must_use]
    pub const fn vpu_name(self) -> &'static str {
        match self {
            Self::MacroTask => "Macro",
            Self::MicroTask => "Micro",
            Self::AnimationFrame => "AnimationFrame",
            Self::AfterFrame => "AfterFrame",
            Self::OnIdle => "OnIdle",
        }
    }

    /// Prefix of names generated for tasks queued without one.
    #[must_use]
    pub const fn task_prefix(self) -> &'static str {
        match self {
            Self::MacroTask => "MacroTask",
            Self::MicroTask => "MicroTask",
            Self::AnimationFrame => "AnimationFrameTask",
            Self::AfterFrame => "AfterFrameTask",
            Self::OnIdle => "OnIdleTask",
        }
    }

    /// Executor strategy used unless the builder overrides it.
    #[must_use]
    pub const fn default_executor(self) -> ExecutorKind {
        match self {
            Self::OnIdle => ExecutorKind::DeadlineBased,
            _ => ExecutorKind::RoundBased,
        }
    }

    pub(crate) const fn index(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.vpu_name())
    }
}
