//! Task callbacks, queue entries and cancelable handles.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::core::error::UncaughtError;

type TaskFn = dyn Fn() -> anyhow::Result<()> + Send + Sync + 'static;

/// A shareable task callback.
///
/// Clones share the same callback, and identity (not equality of behavior) is what executors use
/// to reject a task that is already queued. A callback signals failure by returning `Err` or by
/// panicking; both are captured by [`Task::invoke`].
#[derive(Clone)]
pub struct Task {
    callback: Arc<TaskFn>,
}

impl Task {
    /// Wrap an infallible callback.
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::fallible(move || {
            callback();
            Ok(())
        })
    }

    /// Wrap a callback that may fail.
    pub fn fallible<F>(callback: F) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            callback: Arc::new(callback),
        }
    }

    /// True if both handles refer to the same callback.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.callback), Arc::as_ptr(&other.callback))
    }

    /// Run the callback, capturing an error return or a panic.
    ///
    /// # Errors
    ///
    /// Returns the captured failure; it never unwinds into the caller.
    pub fn invoke(&self) -> Result<(), UncaughtError> {
        match catch_unwind(AssertUnwindSafe(|| (self.callback)())) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(error)) => Err(UncaughtError::Failed(error)),
            Err(payload) => Err(UncaughtError::from_panic(payload.as_ref())),
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Task@{:p}", Arc::as_ptr(&self.callback).cast::<()>())
    }
}

/// Lifecycle of a queued entry. Leaves `Pending` exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Waiting to run.
    Pending,
    /// The callback has been taken for execution.
    Executed,
    /// Cancelled before it ran.
    Cancelled,
}

/// Secondary side effect run when an entry is cancelled, e.g. stopping a pending timer.
pub type CancelAction = Box<dyn FnOnce() + Send + 'static>;

struct EntryInner {
    state: TaskState,
    task: Option<Task>,
    cancel_action: Option<CancelAction>,
}

/// A task plus its optional name and cancel side effect.
///
/// Execute and cancel are idempotent and mutually exclusive: whichever happens first wins and
/// releases the callback and the cancel action.
pub struct TaskEntry {
    name: Option<String>,
    inner: Mutex<EntryInner>,
}

impl TaskEntry {
    /// An entry with only a callback.
    #[must_use]
    pub fn new(task: Task) -> Self {
        Self::with_cancel_action(None, task, None)
    }

    /// An entry with a diagnostic name and an optional secondary cancel action.
    #[must_use]
    pub fn with_cancel_action(
        name: Option<String>,
        task: Task,
        cancel_action: Option<CancelAction>,
    ) -> Self {
        Self {
            name,
            inner: Mutex::new(EntryInner {
                state: TaskState::Pending,
                task: Some(task),
                cancel_action,
            }),
        }
    }

    /// Diagnostic name, if one was supplied.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> TaskState {
        self.inner.lock().state
    }

    /// True while the entry still holds `task`.
    #[must_use]
    pub fn holds(&self, task: &Task) -> bool {
        self.inner
            .lock()
            .task
            .as_ref()
            .is_some_and(|held| held.same_as(task))
    }

    /// Run the callback if the entry is still pending.
    ///
    /// The callback and cancel action are released before the callback runs, so the entry is
    /// `Executed` even when the callback fails.
    ///
    /// # Errors
    ///
    /// Returns the failure captured from the callback.
    pub fn execute(&self) -> Result<(), UncaughtError> {
        let task = {
            let mut inner = self.inner.lock();
            if inner.state != TaskState::Pending {
                return Ok(());
            }
            inner.state = TaskState::Executed;
            inner.cancel_action = None;
            inner.task.take()
        };
        task.map_or(Ok(()), |task| task.invoke())
    }

    /// Cancel the entry if it is still pending, running the cancel action once.
    pub fn cancel(&self) {
        let action = {
            let mut inner = self.inner.lock();
            if inner.state != TaskState::Pending {
                return;
            }
            inner.state = TaskState::Cancelled;
            inner.task = None;
            inner.cancel_action.take()
        };
        if let Some(action) = action {
            action();
        }
    }
}

impl fmt::Display for TaskEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => f.write_str(name),
            None => write!(f, "TaskEntry@{:p}", std::ptr::from_ref(self)),
        }
    }
}

impl fmt::Debug for TaskEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskEntry")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

/// Handle allowing at-most-once cancellation of a scheduled task.
///
/// The handle does not keep the entry alive: once the queue or timer that owns the entry releases
/// it, [`Cancelable::cancel`] does nothing and [`Cancelable::state`] returns `None`.
#[derive(Clone, Debug)]
pub struct Cancelable {
    entry: Weak<TaskEntry>,
    name: Option<String>,
}

impl Cancelable {
    pub(crate) fn new(entry: &Arc<TaskEntry>) -> Self {
        Self {
            entry: Arc::downgrade(entry),
            name: entry.name().map(ToString::to_string),
        }
    }

    /// Cancel the task. Repeated calls, or calls after the task ran, have no further effect.
    pub fn cancel(&self) {
        if let Some(entry) = self.entry.upgrade() {
            entry.cancel();
        }
    }

    /// State of the underlying entry, or `None` once its owner has released it.
    #[must_use]
    pub fn state(&self) -> Option<TaskState> {
        self.entry.upgrade().map(|entry| entry.state())
    }

    /// Diagnostic name of the task, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}
