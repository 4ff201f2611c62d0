//! Core scheduling abstractions: tasks, queues, executors, VPUs and timers.

pub mod error;
pub mod executor;
pub mod ring_buffer;
pub mod task;
pub mod temporal;
pub mod uncaught;
pub mod vpu;

pub use error::{AppResult, SchedulerError, UncaughtError};
pub use executor::{
    Activation, ActivationContext, ActivationTrigger, DeadlineBasedExecutor, DeadlineProbe,
    Executor, ExecutorCore, ExecutorKind, PassThroughContext, RoundBasedExecutor, TimeBudget,
    INITIAL_QUEUE_SIZE, MIN_TASK_TIME,
};
pub use ring_buffer::RingBuffer;
pub use task::{Cancelable, Task, TaskEntry, TaskState};
pub use temporal::{
    IsolatedWorkerTimers, TemporalScheduler, ThreadPoolTimers, TimerBackend, TimerCallback,
    TimerKind, TimerSpec,
};
pub use uncaught::{SharedErrorHandler, UncaughtErrorHandler, UncaughtErrorRegistry};
pub use vpu::{ActivationRegistry, VirtualProcessorUnit, VpuInfo};
