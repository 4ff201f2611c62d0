//! Message protocol between the scheduling side and the isolated timer worker.
//!
//! Commands flowing to the worker:
//!
//! ```text
//! {"action":"+","type":"dt","id":1,"delay":250,"name":"DelayedTask@1"}
//! {"action":"-","type":"pt","id":2}
//! ```
//!
//! Ticks flowing back when a timer fires:
//!
//! ```text
//! {"type":"dt","id":1}
//! ```
//!
//! This is an internal transport between two ends of the same process, not a stable format.

use serde::{Deserialize, Serialize};

use crate::core::error::SchedulerError;

use super::{TimerKind, TimerSpec};

/// Register or cancel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimerAction {
    /// Start a timer.
    #[serde(rename = "+")]
    Add,
    /// Stop a timer.
    #[serde(rename = "-")]
    Remove,
}

/// Request sent to the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerCommand {
    /// Register or cancel.
    pub action: TimerAction,
    /// Delayed or periodic.
    #[serde(rename = "type")]
    pub kind: TimerKind,
    /// Timer id assigned by the scheduling side.
    pub id: u64,
    /// Delay of a delayed timer, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<u64>,
    /// Period of a periodic timer, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<u64>,
    /// Diagnostic name, omitted for anonymous tasks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl TimerCommand {
    /// Registration message for `timer`.
    #[must_use]
    pub fn add(timer: &TimerSpec) -> Self {
        let (delay, period) = match timer.kind {
            TimerKind::Delayed => (Some(timer.interval_ms), None),
            TimerKind::Periodic => (None, Some(timer.interval_ms)),
        };
        Self {
            action: TimerAction::Add,
            kind: timer.kind,
            id: timer.id,
            delay,
            period,
            name: timer.name.clone(),
        }
    }

    /// Cancellation message for `timer`.
    #[must_use]
    pub fn remove(timer: &TimerSpec) -> Self {
        Self {
            action: TimerAction::Remove,
            kind: timer.kind,
            id: timer.id,
            delay: None,
            period: None,
            name: timer.name.clone(),
        }
    }

    /// The interval a registration carries for its timer type, if present.
    #[must_use]
    pub const fn interval(&self) -> Option<u64> {
        match self.kind {
            TimerKind::Delayed => self.delay,
            TimerKind::Periodic => self.period,
        }
    }
}

/// Notification sent by the worker when a timer fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerTick {
    /// Delayed or periodic.
    #[serde(rename = "type")]
    pub kind: TimerKind,
    /// Id of the timer that fired.
    pub id: u64,
}

/// Encode a message for the channel.
///
/// # Errors
///
/// `Backend` if serialization fails.
pub fn encode<T: Serialize>(message: &T) -> Result<String, SchedulerError> {
    serde_json::to_string(message)
        .map_err(|e| SchedulerError::Backend(format!("timer message encode failed: {e}")))
}

/// Decode a message received from the channel.
///
/// # Errors
///
/// `Backend` if the text is not a well-formed message of the expected shape.
pub fn decode<'a, T: Deserialize<'a>>(text: &'a str) -> Result<T, SchedulerError> {
    serde_json::from_str(text)
        .map_err(|e| SchedulerError::Backend(format!("invalid timer message `{text}`: {e}")))
}
