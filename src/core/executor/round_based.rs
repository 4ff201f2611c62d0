//! Round-based executor: fair draining with runaway detection.
//!
//! At the start of a round the number of queued tasks is recorded and exactly that many tasks run
//! in the round. Tasks queued while a round is in progress wait for the next round. If work is
//! still queued after `max_rounds` consecutive rounds the executor assumes tasks are re-scheduling
//! each other forever and applies the runaway policy.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::SchedulerConfig;
use crate::core::error::SchedulerError;
use crate::core::uncaught::UncaughtErrorRegistry;

use super::{ActivationTrigger, Executor, ExecutorCore};

#[derive(Debug, Default)]
struct RoundState {
    current_round: u32,
    remaining_tasks_in_current_round: usize,
}

/// Executor that runs tasks in rounds until the queue drains or the round budget is exceeded.
pub struct RoundBasedExecutor {
    core: ExecutorCore,
    max_rounds: u32,
    purge_on_runaway: bool,
    check_invariants: bool,
    state: Mutex<RoundState>,
}

impl RoundBasedExecutor {
    /// Create an executor using `max_rounds` and the runaway policy from `config`.
    #[must_use]
    pub fn new(
        config: &SchedulerConfig,
        trigger: Arc<dyn ActivationTrigger>,
        errors: Arc<UncaughtErrorRegistry>,
    ) -> Self {
        Self {
            core: ExecutorCore::new(config, trigger, errors),
            max_rounds: config.max_rounds,
            purge_on_runaway: config.purge_tasks_on_runaway,
            check_invariants: config.check_invariants,
            state: Mutex::new(RoundState::default()),
        }
    }

    /// Maximum consecutive rounds before runaway tasks are detected.
    #[must_use]
    pub const fn max_rounds(&self) -> u32 {
        self.max_rounds
    }

    /// The round in progress, 0 when idle.
    #[must_use]
    pub fn current_round(&self) -> u32 {
        self.state.lock().current_round
    }

    /// Tasks still to run in the current round.
    #[must_use]
    pub fn remaining_tasks_in_current_round(&self) -> usize {
        self.state.lock().remaining_tasks_in_current_round
    }

    /// True while a drain is in progress.
    #[must_use]
    pub fn are_tasks_executing(&self) -> bool {
        self.current_round() != 0
    }

    /// Run tasks until the queue is exhausted or runaway tasks are detected.
    ///
    /// # Errors
    ///
    /// `RunawayTasksDetected` when the round budget is exceeded and invariant checking is on.
    pub fn execute_tasks(&self) -> Result<(), SchedulerError> {
        while self.run_next_task()? {}
        Ok(())
    }

    /// Run the next task, starting a new round if the current one is finished.
    ///
    /// Returns `Ok(false)` when no task ran: the queue is empty, or runaway tasks were detected
    /// and handled without failing.
    ///
    /// # Errors
    ///
    /// `RunawayTasksDetected` when the round budget is exceeded and invariant checking is on.
    pub fn run_next_task(&self) -> Result<bool, SchedulerError> {
        {
            let mut state = self.state.lock();
            if state.remaining_tasks_in_current_round == 0 {
                let pending = self.core.queue_size();
                if pending == 0 {
                    state.current_round = 0;
                    return Ok(false);
                } else if state.current_round + 1 > self.max_rounds {
                    state.current_round = 0;
                    drop(state);
                    self.on_runaway_tasks_detected()?;
                    return Ok(false);
                }
                state.current_round += 1;
                state.remaining_tasks_in_current_round = pending;
            }
            state.remaining_tasks_in_current_round -= 1;
        }
        // Tasks nearest the front are the likeliest runaway culprits, so the front runs first
        self.core.execute_next_task();
        Ok(true)
    }

    fn on_runaway_tasks_detected(&self) -> Result<(), SchedulerError> {
        let tasks = self.runaway_task_names();
        tracing::warn!(
            max_rounds = self.max_rounds,
            queued = self.core.queue_size(),
            purge = self.purge_on_runaway,
            "runaway tasks detected"
        );
        if self.purge_on_runaway {
            self.core.clear();
        }
        if self.check_invariants {
            return Err(SchedulerError::RunawayTasksDetected {
                max_rounds: self.max_rounds,
                tasks,
            });
        }
        Ok(())
    }

    #[cfg(feature = "runaway-diagnostics")]
    fn runaway_task_names(&self) -> Vec<String> {
        if self.check_invariants {
            self.core.queued_task_names()
        } else {
            Vec::new()
        }
    }

    #[cfg(not(feature = "runaway-diagnostics"))]
    fn runaway_task_names(&self) -> Vec<String> {
        Vec::new()
    }
}

impl Executor for RoundBasedExecutor {
    fn core(&self) -> &ExecutorCore {
        &self.core
    }

    fn activate(&self) -> Result<(), SchedulerError> {
        self.core.context()?.activate(&mut || self.execute_tasks())
    }

    fn reset(&self) {
        self.core.reset();
        *self.state.lock() = RoundState::default();
    }
}

impl std::fmt::Debug for RoundBasedExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoundBasedExecutor")
            .field("max_rounds", &self.max_rounds)
            .field("current_round", &self.current_round())
            .field("queue_size", &self.core.queue_size())
            .finish()
    }
}
