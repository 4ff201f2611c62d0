//! In-process timer backend: a single background thread draining a deadline heap.
//!
//! The thread blocks on its command channel until the earliest deadline (no polling). Dropping
//! the sender is the shutdown signal.

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

use super::{fire, TimerBackend, TimerCallback, TimerKind, TimerSpec};

enum Command {
    Schedule {
        timer: TimerSpec,
        callback: TimerCallback,
    },
    Cancel(u64),
}

struct ScheduledTimer {
    timer: TimerSpec,
    callback: TimerCallback,
    due: Instant,
}

/// Timer backend running every callback on one dedicated thread.
///
/// Delayed timers fire once after their delay. Periodic timers fire immediately and then at a
/// fixed rate. Callbacks run while holding [`ThreadPoolTimers::callback_lock`], so at most one
/// timer callback runs at a time.
pub struct ThreadPoolTimers {
    commands: Mutex<Option<Sender<Command>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    callback_lock: Arc<Mutex<()>>,
}

impl ThreadPoolTimers {
    /// Spawn the timer thread.
    ///
    /// # Errors
    ///
    /// `Backend` if the thread cannot be spawned.
    pub fn start(errors: Arc<UncaughtErrorRegistry>) -> Result<Self, SchedulerError> {
        let (tx, rx) = unbounded::<Command>();
        let callback_lock = Arc::new(Mutex::new(()));
        let lock = Arc::clone(&callback_lock);
        let thread = thread::Builder::new()
            .name("vpu-timer".into())
            .spawn(move || run_timer_loop(&rx, &errors, &lock))
            .map_err(|e| SchedulerError::Backend(format!("failed to spawn timer thread: {e}")))?;
        info!("timer thread started");
        Ok(Self {
            commands: Mutex::new(Some(tx)),
            thread: Mutex::new(Some(thread)),
            callback_lock,
        })
    }

    /// Lock held while a timer callback runs. Holding it keeps timers from firing.
    #[must_use]
    pub fn callback_lock(&self) -> &Mutex<()> {
        &self.callback_lock
    }

    fn send(&self, command: Command) -> Result<(), SchedulerError> {
        let commands = self.commands.lock();
        let Some(tx) = commands.as_ref() else {
            return Err(SchedulerError::Backend("timer thread is shut down".into()));
        };
        tx.send(command)
            .map_err(|_| SchedulerError::Backend("timer thread stopped".into()))
    }
}

impl TimerBackend for ThreadPoolTimers {
    fn schedule(&self, timer: TimerSpec, callback: TimerCallback) -> Result<(), SchedulerError> {
        if timer.kind == TimerKind::Periodic && timer.interval_ms == 0 {
            return Err(SchedulerError::Backend(format!(
                "periodic timer {} needs a positive interval",
                timer.id
            )));
        }
        self.send(Command::Schedule { timer, callback })
    }

    fn cancel(&self, timer: &TimerSpec) {
        if self.send(Command::Cancel(timer.id)).is_err() {
            debug!(timer_id = timer.id, "cancel after timer thread shutdown ignored");
        }
    }

    fn shutdown(&self) {
        // Dropping the sender ends the loop
        if self.commands.lock().take().is_some() {
            debug!("timer thread signalled to stop");
        }
    }

    fn join(&self) {
        let handle = self.thread.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                debug!("timer thread join requested from a timer callback, skipping");
                return;
            }
            if handle.join().is_err() {
                warn!("timer thread panicked");
            }
            info!("timer thread stopped");
        }
    }
}

impl Drop for ThreadPoolTimers {
    fn drop(&mut self) {
        // Signal only; join() waits
        self.commands.lock().take();
    }
}

impl std::fmt::Debug for ThreadPoolTimers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPoolTimers")
            .field("running", &self.commands.lock().is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct TimerTable {
    timers: HashMap<u64, ScheduledTimer>,
    deadlines: BinaryHeap<Reverse<(Instant, u64)>>,
}

impl TimerTable {
    fn apply(&mut self, command: Command) {
        match command {
            Command::Schedule { timer, callback } => {
                let due = match timer.kind {
                    TimerKind::Delayed => Instant::now() + Duration::from_millis(timer.interval_ms),
                    TimerKind::Periodic => Instant::now(),
                };
                self.deadlines.push(Reverse((due, timer.id)));
                self.timers.insert(timer.id, ScheduledTimer { timer, callback, due });
            }
            Command::Cancel(id) => {
                // The heap entry goes stale and is skipped when it surfaces
                self.timers.remove(&id);
            }
        }
    }

    fn next_due(&self) -> Option<Instant> {
        self.deadlines.peek().map(|Reverse((due, _))| *due)
    }

    /// Pop the next timer due at or before `now`, rescheduling periodic timers.
    fn take_due(&mut self, now: Instant) -> Option<(u64, TimerCallback)> {
        while let Some(Reverse((due, id))) = self.deadlines.peek().copied() {
            if due > now {
                return None;
            }
            self.deadlines.pop();
            let Some(scheduled) = self.timers.get_mut(&id) else {
                continue;
            };
            if scheduled.due != due {
                continue;
            }
            let callback = Arc::clone(&scheduled.callback);
            match scheduled.timer.kind {
                TimerKind::Delayed => {
                    self.timers.remove(&id);
                }
                TimerKind::Periodic => {
                    let next = due + Duration::from_millis(scheduled.timer.interval_ms);
                    scheduled.due = next;
                    self.deadlines.push(Reverse((next, id)));
                }
            }
            return Some((id, callback));
        }
        None
    }
}

fn run_timer_loop(rx: &Receiver<Command>, errors: &UncaughtErrorRegistry, lock: &Mutex<()>) {
    let mut table = TimerTable::default();
    loop {
        let received = match table.next_due() {
            Some(due) => rx.recv_deadline(due),
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match received {
            Ok(command) => table.apply(command),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        loop {
            // Apply cancellations that arrived before each fire
            if !drain_commands(rx, &mut table) {
                debug!(pending = table.timers.len(), "timer thread signalled, dropping due timers");
                return;
            }
            let Some((id, callback)) = table.take_due(Instant::now()) else {
                break;
            };
            let _guard = lock.lock();
            fire(errors, id, &callback);
        }
    }
    debug!(pending = table.timers.len(), "timer thread channel closed, exiting");
}

/// Apply every queued command. Returns false once the channel is closed.
fn drain_commands(rx: &Receiver<Command>, table: &mut TimerTable) -> bool {
    loop {
        match rx.try_recv() {
            Ok(command) => table.apply(command),
            Err(TryRecvError::Empty) => return true,
            Err(TryRecvError::Disconnected) => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::UncaughtError;
    use crossbeam_channel::bounded;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn spec(id: u64, kind: TimerKind, interval_ms: u64) -> TimerSpec {
        TimerSpec {
            id,
            name: None,
            kind,
            interval_ms,
        }
    }

    fn signalling(tx: Sender<u64>, id: u64) -> TimerCallback {
        Arc::new(move || -> Result<(), UncaughtError> {
            let _ = tx.send(id);
            Ok(())
        })
    }

    #[test]
    fn test_delayed_timer_fires_once() {
        let timers = ThreadPoolTimers::start(Arc::new(UncaughtErrorRegistry::new(true, true))).unwrap();
        let (tx, rx) = bounded(8);
        timers
            .schedule(spec(1, TimerKind::Delayed, 5), signalling(tx, 1))
            .unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 1);
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        timers.shutdown();
        timers.join();
    }

    #[test]
    fn test_earlier_deadline_fires_first() {
        let timers = ThreadPoolTimers::start(Arc::new(UncaughtErrorRegistry::new(true, true))).unwrap();
        let (tx, rx) = bounded(8);
        timers
            .schedule(spec(1, TimerKind::Delayed, 200), signalling(tx.clone(), 1))
            .unwrap();
        timers
            .schedule(spec(2, TimerKind::Delayed, 10), signalling(tx, 2))
            .unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 2);
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 1);
        timers.shutdown();
        timers.join();
    }

    #[test]
    fn test_cancel_before_fire() {
        let timers = ThreadPoolTimers::start(Arc::new(UncaughtErrorRegistry::new(true, true))).unwrap();
        let (tx, rx) = bounded(8);
        let timer = spec(1, TimerKind::Delayed, 100);
        timers.schedule(timer.clone(), signalling(tx, 1)).unwrap();
        timers.cancel(&timer);
        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
        timers.shutdown();
        timers.join();
    }

    #[test]
    fn test_callback_lock_holds_timers_back() {
        let timers = ThreadPoolTimers::start(Arc::new(UncaughtErrorRegistry::new(true, true))).unwrap();
        let (tx, rx) = bounded(8);
        let guard = timers.callback_lock().lock();
        timers
            .schedule(spec(1, TimerKind::Delayed, 0), signalling(tx, 1))
            .unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        drop(guard);
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 1);
        timers.shutdown();
        timers.join();
    }

    #[test]
    fn test_periodic_timer_cancelled_from_second_fire_fires_twice() {
        let timers = Arc::new(
            ThreadPoolTimers::start(Arc::new(UncaughtErrorRegistry::new(true, true))).unwrap(),
        );
        let (tx, rx) = bounded(64);
        let timer = spec(1, TimerKind::Periodic, 5);
        let fires = Arc::new(AtomicUsize::new(0));

        let owner = Arc::downgrade(&timers);
        let cancelled = timer.clone();
        let counted = Arc::clone(&fires);
        let callback: TimerCallback = Arc::new(move || -> Result<(), UncaughtError> {
            if counted.fetch_add(1, Ordering::SeqCst) == 1 {
                if let Some(timers) = owner.upgrade() {
                    timers.cancel(&cancelled);
                }
            }
            let _ = tx.send(1);
            Ok(())
        });
        timers.schedule(timer, callback).unwrap();

        for _ in 0..2 {
            assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 1);
        }
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert_eq!(fires.load(Ordering::SeqCst), 2);
        timers.shutdown();
        timers.join();
    }

    #[test]
    fn test_zero_interval_periodic_timer_rejected() {
        let timers = ThreadPoolTimers::start(Arc::new(UncaughtErrorRegistry::new(true, true))).unwrap();
        let (tx, rx) = bounded(8);
        let err = timers
            .schedule(spec(1, TimerKind::Periodic, 0), signalling(tx.clone(), 1))
            .unwrap_err();
        assert_eq!(err.code(), "backend");

        // The thread stays responsive
        timers
            .schedule(spec(2, TimerKind::Delayed, 0), signalling(tx, 2))
            .unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 2);
        timers.shutdown();
        timers.join();
    }

    #[test]
    fn test_shutdown_under_callback_lock_does_not_block() {
        let timers = ThreadPoolTimers::start(Arc::new(UncaughtErrorRegistry::new(true, true))).unwrap();
        let (tx, rx) = bounded(8);
        let guard = timers.callback_lock().lock();
        timers
            .schedule(spec(1, TimerKind::Delayed, 0), signalling(tx, 1))
            .unwrap();
        std::thread::sleep(Duration::from_millis(20));
        timers.shutdown();
        drop(guard);
        timers.join();
        // At most the timer already waiting on the lock fires
        let _ = rx.try_recv();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_schedule_after_shutdown_fails() {
        let timers = ThreadPoolTimers::start(Arc::new(UncaughtErrorRegistry::new(true, true))).unwrap();
        timers.shutdown();
        timers.join();
        let (tx, _rx) = bounded(1);
        let err = timers
            .schedule(spec(1, TimerKind::Delayed, 0), signalling(tx, 1))
            .unwrap_err();
        assert_eq!(err.code(), "backend");
    }

    #[test]
    fn test_take_due_skips_cancelled_and_reschedules_periodic() {
        let mut table = TimerTable::default();
        let (tx, _rx) = bounded(8);
        table.apply(Command::Schedule {
            timer: spec(1, TimerKind::Periodic, 10),
            callback: signalling(tx.clone(), 1),
        });
        table.apply(Command::Schedule {
            timer: spec(2, TimerKind::Periodic, 10),
            callback: signalling(tx, 2),
        });
        table.apply(Command::Cancel(2));

        let now = Instant::now();
        let (id, _) = table.take_due(now).unwrap();
        assert_eq!(id, 1);
        assert!(table.take_due(now).is_none());
        assert!(table.take_due(now + Duration::from_millis(20)).is_some());
        assert_eq!(table.timers.len(), 1);
    }
}
