//! # Prometheus VPU
//!
//! A cooperative task scheduler that multiplexes callbacks onto named virtual processor units
//! (VPUs), one per execution phase.
//!
//! Every VPU owns a task queue and an executor strategy. Queuing a task on an idle VPU asks the
//! VPU's activation trigger to run it later, outside the caller's stack. At most one VPU is active
//! at any time, so tasks never interleave.
//!
//! ## Phases
//!
//! | Phase            | Executor       | Default trigger            |
//! |------------------|----------------|----------------------------|
//! | `MacroTask`      | round based    | zero-delay timer           |
//! | `MicroTask`      | round based    | zero-delay timer           |
//! | `AnimationFrame` | round based    | zero-delay timer           |
//! | `AfterFrame`     | round based    | zero-delay timer           |
//! | `OnIdle`         | deadline based | zero-delay timer + budget  |
//!
//! Hosts with a frame loop replace the frame triggers with a [`runtime::ManualTrigger`] and
//! drain it once per frame.
//!
//! ## Timers
//!
//! Delayed and periodic tasks are driven by a timer backend: a dedicated timer thread
//! ([`core::ThreadPoolTimers`]) or an isolated worker exchanging JSON messages
//! ([`core::IsolatedWorkerTimers`]). A firing timer re-enters the default phase, running its task
//! as the first task of a fresh `MacroTask` activation.
//!
//! ## Errors
//!
//! Misuse is reported as a [`core::SchedulerError`] while invariant checking is on. Failures and
//! panics escaping task callbacks never propagate; they go to the registered uncaught error
//! handlers.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use prometheus_vpu::config::SchedulerConfig;
//! use prometheus_vpu::core::{Task, UncaughtError};
//! use prometheus_vpu::runtime::Scheduler;
//!
//! prometheus_vpu::util::init_tracing();
//! let scheduler = Scheduler::new(SchedulerConfig::from_env()?)?;
//! scheduler.add_uncaught_error_handler(Arc::new(|error: &UncaughtError| {
//!     tracing::error!(%error, "task failed");
//! }))?;
//!
//! scheduler.micro_task_named("Render", Task::new(|| println!("render")))?;
//! scheduler.delayed_task(Task::new(|| println!("later")), 250)?;
//! ```

#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Tasks, queues, executors, VPUs, timers and error types.
pub mod core;
/// Scheduler configuration and environment loading.
pub mod config;
/// Builders to construct a scheduler from configuration.
pub mod builders;
/// The scheduler facade, phases and activation triggers.
pub mod runtime;
/// Shared utilities.
pub mod util;
