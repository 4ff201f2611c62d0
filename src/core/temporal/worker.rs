//! Isolated-worker timer backend.
//!
//! Timer bookkeeping runs on a worker thread that owns its timer table outright. The scheduling
//! side keeps only the id to callback map and exchanges JSON text messages with the worker:
//! commands go in, ticks come out. A dispatcher thread receives ticks and runs the callbacks, so
//! a slow callback never delays the worker's clock.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::core::error::SchedulerError;
use crate::core::uncaught::UncaughtErrorRegistry;

use super::protocol::{decode, encode, TimerAction, TimerCommand, TimerTick};
use super::{fire, TimerBackend, TimerCallback, TimerKind, TimerSpec};

type CallbackMap = Arc<Mutex<HashMap<u64, TimerCallback>>>;

/// Timer backend that keeps timers on an isolated worker thread.
pub struct IsolatedWorkerTimers {
    to_worker: Mutex<Option<Sender<String>>>,
    callbacks: CallbackMap,
    threads: Mutex<Vec<JoinHandle<()>>>,
    log_protocol: bool,
}

impl IsolatedWorkerTimers {
    /// Spawn the worker and dispatcher threads.
    ///
    /// When `log_protocol` is set every message is logged at info level on both ends.
    ///
    /// # Errors
    ///
    /// `Backend` if a thread cannot be spawned.
    pub fn start(
        errors: Arc<UncaughtErrorRegistry>,
        log_protocol: bool,
    ) -> Result<Self, SchedulerError> {
        let (command_tx, command_rx) = unbounded::<String>();
        let (tick_tx, tick_rx) = unbounded::<String>();
        let callbacks: CallbackMap = Arc::new(Mutex::new(HashMap::new()));

        let worker = thread::Builder::new()
            .name("vpu-timer-worker".into())
            .spawn(move || run_worker(&command_rx, &tick_tx, log_protocol))
            .map_err(|e| SchedulerError::Backend(format!("failed to spawn timer worker: {e}")))?;

        let dispatch_callbacks = Arc::clone(&callbacks);
        let dispatcher = thread::Builder::new()
            .name("vpu-timer-dispatch".into())
            .spawn(move || run_dispatcher(&tick_rx, &dispatch_callbacks, &errors, log_protocol))
            .map_err(|e| {
                SchedulerError::Backend(format!("failed to spawn timer dispatcher: {e}"))
            })?;

        info!(log_protocol, "isolated timer worker started");
        Ok(Self {
            to_worker: Mutex::new(Some(command_tx)),
            callbacks,
            threads: Mutex::new(vec![worker, dispatcher]),
            log_protocol,
        })
    }

    /// Number of timers whose callbacks are still registered.
    #[must_use]
    pub fn live_timers(&self) -> usize {
        self.callbacks.lock().len()
    }

    fn post(&self, command: &TimerCommand) -> Result<(), SchedulerError> {
        let message = encode(command)?;
        if self.log_protocol {
            info!(message = %message, "[main] posting timer command");
        }
        let to_worker = self.to_worker.lock();
        let Some(tx) = to_worker.as_ref() else {
            return Err(SchedulerError::Backend("timer worker is shut down".into()));
        };
        tx.send(message)
            .map_err(|_| SchedulerError::Backend("timer worker stopped".into()))
    }
}

impl TimerBackend for IsolatedWorkerTimers {
    fn schedule(&self, timer: TimerSpec, callback: TimerCallback) -> Result<(), SchedulerError> {
        if timer.kind == TimerKind::Periodic && timer.interval_ms == 0 {
            return Err(SchedulerError::Backend(format!(
                "periodic timer {} needs a positive interval",
                timer.id
            )));
        }
        self.callbacks.lock().insert(timer.id, callback);
        let posted = self.post(&TimerCommand::add(&timer));
        if posted.is_err() {
            self.callbacks.lock().remove(&timer.id);
        }
        posted
    }

    fn cancel(&self, timer: &TimerSpec) {
        // Removing the callback first makes any tick already in flight a no-op
        self.callbacks.lock().remove(&timer.id);
        if self.post(&TimerCommand::remove(timer)).is_err() {
            debug!(timer_id = timer.id, "cancel after timer worker shutdown ignored");
        }
    }

    fn shutdown(&self) {
        if self.to_worker.lock().take().is_some() {
            debug!("isolated timer worker signalled to stop");
        }
        // Ticks still in flight find no callback
        self.callbacks.lock().clear();
    }

    fn join(&self) {
        let handles: Vec<JoinHandle<()>> = self.threads.lock().drain(..).collect();
        if handles.is_empty() {
            return;
        }
        let current = thread::current().id();
        for handle in handles {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                warn!("timer worker thread panicked");
            }
        }
        info!("isolated timer worker stopped");
    }
}

impl Drop for IsolatedWorkerTimers {
    fn drop(&mut self) {
        self.to_worker.lock().take();
    }
}

impl std::fmt::Debug for IsolatedWorkerTimers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IsolatedWorkerTimers")
            .field("live_timers", &self.live_timers())
            .field("log_protocol", &self.log_protocol)
            .finish_non_exhaustive()
    }
}

struct WorkerTimer {
    name: Option<String>,
    kind: TimerKind,
    interval: Duration,
    due: Instant,
}

/// Timer table owned by the worker thread.
#[derive(Default)]
struct WorkerState {
    timers: HashMap<u64, WorkerTimer>,
    deadlines: BinaryHeap<Reverse<(Instant, u64)>>,
}

impl WorkerState {
    fn handle(&mut self, command: TimerCommand, log_protocol: bool) {
        match (command.action, command.interval()) {
            (TimerAction::Add, Some(0)) if command.kind == TimerKind::Periodic => {
                warn!(id = command.id, "[worker] periodic timer without a positive interval ignored");
            }
            (TimerAction::Add, Some(interval_ms)) => {
                let interval = Duration::from_millis(interval_ms);
                let due = Instant::now() + interval;
                self.deadlines.push(Reverse((due, command.id)));
                self.timers.insert(
                    command.id,
                    WorkerTimer {
                        name: command.name,
                        kind: command.kind,
                        interval,
                        due,
                    },
                );
            }
            (TimerAction::Remove, _) => {
                self.timers.remove(&command.id);
            }
            (TimerAction::Add, None) => {
                if log_protocol {
                    info!(id = command.id, "[worker] invalid timer request without interval");
                }
            }
        }
    }

    fn next_due(&self) -> Option<Instant> {
        self.deadlines.peek().map(|Reverse((due, _))| *due)
    }

    fn take_due(&mut self, now: Instant) -> Option<(TimerTick, Option<String>)> {
        while let Some(Reverse((due, id))) = self.deadlines.peek().copied() {
            if due > now {
                return None;
            }
            self.deadlines.pop();
            let Some(timer) = self.timers.get_mut(&id) else {
                continue;
            };
            if timer.due != due {
                continue;
            }
            let tick = TimerTick { kind: timer.kind, id };
            let name = timer.name.clone();
            if timer.kind == TimerKind::Periodic {
                timer.due = due + timer.interval;
                self.deadlines.push(Reverse((timer.due, id)));
            } else {
                self.timers.remove(&id);
            }
            return Some((tick, name));
        }
        None
    }
}

fn run_worker(commands: &Receiver<String>, ticks: &Sender<String>, log_protocol: bool) {
    let mut state = WorkerState::default();
    loop {
        let received = match state.next_due() {
            Some(due) => commands.recv_deadline(due),
            None => commands.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match received {
            Ok(message) => apply_message(&mut state, &message, log_protocol),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        loop {
            match commands.try_recv() {
                Ok(message) => apply_message(&mut state, &message, log_protocol),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    debug!(pending = state.timers.len(), "timer worker signalled, dropping due timers");
                    return;
                }
            }
        }
        while let Some((tick, name)) = state.take_due(Instant::now()) {
            if log_protocol {
                info!(id = tick.id, kind = ?tick.kind, name = ?name, "[worker] timer tick");
            }
            let Ok(message) = encode(&tick) else {
                continue;
            };
            if ticks.send(message).is_err() {
                return;
            }
        }
    }
    debug!(pending = state.timers.len(), "timer worker channel closed, exiting");
}

fn apply_message(state: &mut WorkerState, message: &str, log_protocol: bool) {
    if log_protocol {
        info!(message = %message, timers = state.timers.len(), "[worker] received");
    }
    match decode::<TimerCommand>(message) {
        Ok(command) => state.handle(command, log_protocol),
        Err(error) => warn!(error = %error, "[worker] invalid timer request"),
    }
}

fn run_dispatcher(
    ticks: &Receiver<String>,
    callbacks: &Mutex<HashMap<u64, TimerCallback>>,
    errors: &UncaughtErrorRegistry,
    log_protocol: bool,
) {
    for message in ticks {
        if log_protocol {
            info!(message = %message, "[main] timer tick received");
        }
        let tick: TimerTick = match decode(&message) {
            Ok(tick) => tick,
            Err(error) => {
                warn!(error = %error, "[main] invalid timer tick");
                continue;
            }
        };
        let callback = {
            let mut callbacks = callbacks.lock();
            match tick.kind {
                TimerKind::Delayed => callbacks.remove(&tick.id),
                TimerKind::Periodic => callbacks.get(&tick.id).cloned(),
            }
        };
        if let Some(callback) = callback {
            fire(errors, tick.id, &callback);
        }
    }
    debug!("timer dispatcher channel closed, exiting");
}
