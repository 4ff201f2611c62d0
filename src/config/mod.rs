//! Configuration models for the scheduler and its timer backends.

pub mod scheduler;

pub use scheduler::{Environment, SchedulerConfig, DEFAULT_IDLE_BUDGET, DEFAULT_MAX_ROUNDS, ENV_PREFIX};
