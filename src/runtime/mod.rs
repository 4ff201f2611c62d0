//! The scheduler facade, its phases and the built-in activation triggers.

pub mod phase;
pub mod scheduler;
pub mod triggers;

pub use phase::Phase;
pub use scheduler::Scheduler;
pub use triggers::{IdleTrigger, ManualTrigger, TimerTrigger};
