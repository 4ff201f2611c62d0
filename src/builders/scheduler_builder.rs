//! Builder assembling a [`Scheduler`] from configuration.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::SchedulerConfig;
use crate::core::error::SchedulerError;
use crate::core::executor::{
    ActivationTrigger, DeadlineBasedExecutor, Executor, ExecutorKind, RoundBasedExecutor,
};
use crate::core::temporal::{TemporalScheduler, TimerBackend};
use crate::core::uncaught::UncaughtErrorRegistry;
use crate::core::vpu::{ActivationRegistry, VirtualProcessorUnit};
use crate::runtime::phase::Phase;
use crate::runtime::scheduler::{Scheduler, SchedulerInner};
use crate::runtime::triggers::{IdleTrigger, TimerTrigger};
use crate::util::NameGenerator;

/// Configures triggers, executor strategies and the timer backend before building a [`Scheduler`].
///
/// Phases without an explicit trigger are activated through a zero-delay timer; deadline-based
/// phases get the configured idle budget.
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    triggers: HashMap<Phase, Arc<dyn ActivationTrigger>>,
    executors: HashMap<Phase, ExecutorKind>,
    timer_backend: Option<Arc<dyn TimerBackend>>,
}

impl SchedulerBuilder {
    /// Start from `config` with default triggers and executors.
    #[must_use]
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            triggers: HashMap::new(),
            executors: HashMap::new(),
            timer_backend: None,
        }
    }

    /// Activate `phase` through `trigger`, e.g. a [`ManualTrigger`](crate::runtime::ManualTrigger)
    /// driven by a frame loop.
    #[must_use]
    pub fn with_trigger(mut self, phase: Phase, trigger: Arc<dyn ActivationTrigger>) -> Self {
        self.triggers.insert(phase, trigger);
        self
    }

    /// Drive `phase` with `kind` instead of [`Phase::default_executor`].
    #[must_use]
    pub fn with_executor(mut self, phase: Phase, kind: ExecutorKind) -> Self {
        self.executors.insert(phase, kind);
        self
    }

    /// Use an already running timer backend instead of starting one from the configuration.
    #[must_use]
    pub fn with_timer_backend(mut self, backend: Arc<dyn TimerBackend>) -> Self {
        self.timer_backend = Some(backend);
        self
    }

    /// Validate the configuration, start the timer backend and create one VPU per phase.
    ///
    /// # Errors
    ///
    /// `Backend` for an invalid configuration or a timer thread that cannot start.
    pub fn build(self) -> Result<Scheduler, SchedulerError> {
        let Self {
            config,
            mut triggers,
            executors,
            timer_backend,
        } = self;
        config
            .validate()
            .map_err(|e| SchedulerError::Backend(format!("config invalid: {e}")))?;

        let errors = Arc::new(UncaughtErrorRegistry::new(
            config.enable_uncaught_error_handlers,
            config.check_invariants,
        ));
        let temporal = Arc::new(match timer_backend {
            Some(backend) => TemporalScheduler::with_backend(backend, config.check_invariants),
            None => TemporalScheduler::new(&config, Arc::clone(&errors))?,
        });
        let registry = Arc::new(ActivationRegistry::new(config.check_invariants));

        let mut vpus = Vec::with_capacity(Phase::ALL.len());
        for phase in Phase::ALL {
            let kind = executors
                .get(&phase)
                .copied()
                .unwrap_or_else(|| phase.default_executor());
            let trigger = match triggers.remove(&phase) {
                Some(trigger) => trigger,
                None if kind == ExecutorKind::DeadlineBased => {
                    Arc::new(IdleTrigger::new(Arc::clone(&temporal), config.idle_budget))
                }
                None => Arc::new(TimerTrigger::new(Arc::clone(&temporal))),
            };
            let executor: Arc<dyn Executor> = match kind {
                ExecutorKind::RoundBased => Arc::new(RoundBasedExecutor::new(
                    &config,
                    trigger,
                    Arc::clone(&errors),
                )),
                ExecutorKind::DeadlineBased => Arc::new(DeadlineBasedExecutor::new(
                    &config,
                    trigger,
                    Arc::clone(&errors),
                )),
            };
            let name = config.enable_names.then_some(phase.vpu_name());
            vpus.push(VirtualProcessorUnit::new(
                name,
                executor,
                &registry,
                config.enable_names,
            )?);
            tracing::debug!(phase = %phase, ?kind, "vpu created");
        }

        let names = NameGenerator::new(config.enable_names);
        tracing::info!(
            isolated_worker = config.use_isolated_worker_for_timers,
            check_invariants = config.check_invariants,
            "scheduler built"
        );
        Ok(Scheduler::from_inner(SchedulerInner {
            config,
            registry,
            errors,
            temporal,
            vpus,
            names,
        }))
    }
}

impl std::fmt::Debug for SchedulerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerBuilder")
            .field("config", &self.config)
            .field("triggers", &self.triggers.keys().collect::<Vec<_>>())
            .field("executors", &self.executors)
            .field("custom_timer_backend", &self.timer_backend.is_some())
            .finish()
    }
}
