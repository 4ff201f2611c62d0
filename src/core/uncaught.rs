//! Ordered fan-out of uncaught task errors.
//!
//! The registry is the backstop for task isolation in the executors and for failures on the timer
//! threads, so [`UncaughtErrorRegistry::report`] must never fail back into its caller.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::core::error::{SchedulerError, UncaughtError};

/// Receives errors that escaped task callbacks.
pub trait UncaughtErrorHandler: Send + Sync {
    /// Called once per reported error, in registration order.
    fn on_uncaught_error(&self, error: &UncaughtError);
}

impl<F> UncaughtErrorHandler for F
where
    F: Fn(&UncaughtError) + Send + Sync,
{
    fn on_uncaught_error(&self, error: &UncaughtError) {
        self(error);
    }
}

/// Shared handler reference; identity decides registration and removal.
pub type SharedErrorHandler = Arc<dyn UncaughtErrorHandler>;

fn same_handler(a: &SharedErrorHandler, b: &SharedErrorHandler) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Registry of uncaught error handlers.
pub struct UncaughtErrorRegistry {
    enabled: bool,
    check_invariants: bool,
    handlers: RwLock<Vec<SharedErrorHandler>>,
}

impl UncaughtErrorRegistry {
    /// Create a registry. When `enabled` is false every report is dropped.
    #[must_use]
    pub fn new(enabled: bool, check_invariants: bool) -> Self {
        Self {
            enabled,
            check_invariants,
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Whether reports are delivered to handlers.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    /// True when no handler is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    fn ensure_enabled(&self) -> Result<(), SchedulerError> {
        if self.check_invariants && !self.enabled {
            return Err(SchedulerError::ErrorRegistryDisabled);
        }
        Ok(())
    }

    /// Register a handler at the end of the list.
    ///
    /// # Errors
    ///
    /// `DuplicateErrorHandler` if it is already registered, `ErrorRegistryDisabled` if handlers
    /// are disabled. Both only while invariant checking is on.
    pub fn add(&self, handler: SharedErrorHandler) -> Result<(), SchedulerError> {
        self.ensure_enabled()?;
        let mut handlers = self.handlers.write();
        if self.check_invariants && handlers.iter().any(|h| same_handler(h, &handler)) {
            return Err(SchedulerError::DuplicateErrorHandler);
        }
        handlers.push(handler);
        Ok(())
    }

    /// Remove a previously registered handler.
    ///
    /// # Errors
    ///
    /// `MissingErrorHandler` if it was not registered, `ErrorRegistryDisabled` if handlers are
    /// disabled. Both only while invariant checking is on.
    pub fn remove(&self, handler: &SharedErrorHandler) -> Result<(), SchedulerError> {
        self.ensure_enabled()?;
        let mut handlers = self.handlers.write();
        match handlers.iter().position(|h| same_handler(h, handler)) {
            Some(index) => {
                handlers.remove(index);
                Ok(())
            }
            None if self.check_invariants => Err(SchedulerError::MissingErrorHandler),
            None => Ok(()),
        }
    }

    /// Deliver `error` to every handler in registration order.
    ///
    /// A panicking handler is logged and skipped; the remaining handlers still run.
    pub fn report(&self, error: &UncaughtError) {
        if !self.enabled {
            tracing::debug!(error = %error, "uncaught error dropped, handlers disabled");
            return;
        }
        // Snapshot so handlers may add or remove handlers while being notified
        let handlers: Vec<SharedErrorHandler> = self.handlers.read().clone();
        for (index, handler) in handlers.iter().enumerate() {
            let outcome = catch_unwind(AssertUnwindSafe(|| handler.on_uncaught_error(error)));
            if let Err(payload) = outcome {
                let nested = UncaughtError::from_panic(payload.as_ref());
                tracing::error!(
                    handler_index = index,
                    error = %error,
                    nested = %nested,
                    "uncaught error handler failed while being notified"
                );
            }
        }
    }

    /// Drop all handlers.
    pub fn clear(&self) {
        self.handlers.write().clear();
    }
}

impl std::fmt::Debug for UncaughtErrorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UncaughtErrorRegistry")
            .field("enabled", &self.enabled)
            .field("handlers", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn recording_handler(log: &Arc<Mutex<Vec<String>>>, label: &'static str) -> SharedErrorHandler {
        let log = Arc::clone(log);
        Arc::new(move |error: &UncaughtError| {
            log.lock().push(format!("{label}:{error}"));
        })
    }

    #[test]
    fn test_report_in_registration_order() {
        let registry = UncaughtErrorRegistry::new(true, true);
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.add(recording_handler(&log, "a")).unwrap();
        registry.add(recording_handler(&log, "b")).unwrap();

        registry.report(&UncaughtError::Panicked("x".into()));
        assert_eq!(
            *log.lock(),
            vec!["a:task panicked: x".to_string(), "b:task panicked: x".to_string()]
        );
    }

    #[test]
    fn test_panicking_handler_does_not_stop_others() {
        let registry = UncaughtErrorRegistry::new(true, true);
        let log = Arc::new(Mutex::new(Vec::new()));
        let failing: SharedErrorHandler = Arc::new(|_: &UncaughtError| panic!("handler bug"));
        registry.add(failing).unwrap();
        registry.add(recording_handler(&log, "after")).unwrap();

        registry.report(&UncaughtError::Panicked("x".into()));
        assert_eq!(log.lock().len(), 1);
    }

    #[test]
    fn test_duplicate_and_missing_handlers() {
        let registry = UncaughtErrorRegistry::new(true, true);
        let log = Arc::new(Mutex::new(Vec::new()));
        let handler = recording_handler(&log, "a");
        registry.add(Arc::clone(&handler)).unwrap();

        let err = registry.add(Arc::clone(&handler)).unwrap_err();
        assert_eq!(err.code(), "duplicate-error-handler-registration");

        registry.remove(&handler).unwrap();
        assert!(registry.is_empty());
        let err = registry.remove(&handler).unwrap_err();
        assert_eq!(err.code(), "missing-error-handler-on-removal");
    }

    #[test]
    fn test_disabled_registry() {
        let registry = UncaughtErrorRegistry::new(false, true);
        let log = Arc::new(Mutex::new(Vec::new()));
        let err = registry.add(recording_handler(&log, "a")).unwrap_err();
        assert_eq!(err.code(), "error-registry-accessed-while-disabled");

        // reporting never fails, it just drops the error
        registry.report(&UncaughtError::Panicked("x".into()));
        assert!(log.lock().is_empty());
    }
}
