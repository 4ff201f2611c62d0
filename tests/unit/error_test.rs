//! Tests for error types

use prometheus_vpu::core::{SchedulerError, UncaughtError};

#[test]
fn test_duplicate_task_enqueue_error() {
    let err = SchedulerError::DuplicateTaskEnqueue {
        task: "Render".to_string(),
    };
    assert_eq!(err.code(), "duplicate-task-enqueue");
    assert_eq!(
        format!("{}", err),
        "duplicate-task-enqueue: attempting to queue task Render when task is already queued"
    );
}

#[test]
fn test_negative_delay_error() {
    let err = SchedulerError::NegativeDelay {
        task: "Retry".to_string(),
        delay: -5,
    };
    assert_eq!(err.code(), "negative-delay");
    assert!(format!("{}", err).ends_with("Actual value passed is -5"));
}

#[test]
fn test_runaway_error_lists_tasks() {
    let err = SchedulerError::RunawayTasksDetected {
        max_rounds: 100,
        tasks: vec!["Spin".to_string()],
    };
    let message = format!("{}", err);
    assert!(message.starts_with("runaway-tasks-detected:"));
    assert!(message.contains("after 100 rounds"));
    assert!(message.contains("Spin"));
}

#[test]
fn test_backend_error() {
    let err = SchedulerError::Backend("timer thread stopped".to_string());
    assert_eq!(err.code(), "backend");
    assert_eq!(format!("{}", err), "backend error: timer thread stopped");
}

#[test]
fn test_scheduler_error_converts_to_anyhow() {
    let err: anyhow::Error = SchedulerError::ErrorRegistryDisabled.into();
    let uncaught = UncaughtError::from(err);
    assert!(format!("{}", uncaught).starts_with("task failed: error-registry-accessed-while-disabled"));
}
