//! Diagnostic task names.

use std::sync::atomic::{AtomicU64, Ordering};

/// Generates `Prefix@N` names for tasks scheduled without one.
#[derive(Debug)]
pub struct NameGenerator {
    enabled: bool,
    next_id: AtomicU64,
}

impl NameGenerator {
    /// A generator whose counter starts at 1. A disabled generator always yields `None`.
    #[must_use]
    pub const fn new(enabled: bool) -> Self {
        Self {
            enabled,
            next_id: AtomicU64::new(1),
        }
    }

    /// Whether names are kept at all.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// The supplied name, or a generated one when none was supplied.
    #[must_use]
    pub fn generate(&self, prefix: &str, name: Option<&str>) -> Option<String> {
        if !self.enabled {
            return None;
        }
        Some(name.map_or_else(
            || format!("{prefix}@{}", self.next_id.fetch_add(1, Ordering::Relaxed)),
            ToString::to_string,
        ))
    }

    /// Restart the counter at 1.
    pub fn reset(&self) {
        self.next_id.store(1, Ordering::Relaxed);
    }
}
