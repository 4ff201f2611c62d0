//! Tests for runtime phases and triggers

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use prometheus_vpu::config::SchedulerConfig;
use prometheus_vpu::core::{ExecutorKind, Task};
use prometheus_vpu::runtime::{ManualTrigger, Phase, Scheduler};

#[test]
fn test_phase_defaults() {
    assert_eq!(Phase::default(), Phase::MacroTask);
    assert_eq!(Phase::OnIdle.default_executor(), ExecutorKind::DeadlineBased);
    assert!(Phase::ALL[..4]
        .iter()
        .all(|phase| phase.default_executor() == ExecutorKind::RoundBased));
    assert_eq!(Phase::AnimationFrame.to_string(), "AnimationFrame");
}

#[test]
fn test_generated_task_names_use_phase_prefix() {
    let scheduler = Scheduler::builder(SchedulerConfig::development())
        .with_trigger(Phase::MicroTask, Arc::new(ManualTrigger::new()))
        .with_trigger(Phase::AfterFrame, Arc::new(ManualTrigger::new()))
        .build()
        .expect("scheduler");
    let first = scheduler.micro_task(Task::new(|| {})).expect("queue");
    let second = scheduler.after_frame(Task::new(|| {})).expect("queue");
    let named = scheduler.after_frame_named("Layout", Task::new(|| {})).expect("queue");
    assert_eq!(first.name(), Some("MicroTask@1"));
    assert_eq!(second.name(), Some("AfterFrameTask@2"));
    assert_eq!(named.name(), Some("Layout"));
    scheduler.shutdown();
}

#[test]
fn test_manual_trigger_drives_frame_phases() {
    let animation = Arc::new(ManualTrigger::new());
    let after = Arc::new(ManualTrigger::new());
    let scheduler = Scheduler::builder(SchedulerConfig::development())
        .with_trigger(Phase::AnimationFrame, animation.clone())
        .with_trigger(Phase::AfterFrame, after.clone())
        .build()
        .expect("scheduler");

    let frames = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&frames);
    scheduler
        .animation_frame_named(
            "Paint",
            Task::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .expect("queue");
    scheduler.after_frame(Task::new(|| {})).expect("queue");

    assert_eq!(animation.run_until_idle(4).expect("frame"), 1);
    assert_eq!(frames.load(Ordering::SeqCst), 1);
    assert_eq!(after.pending(), 1);
    assert_eq!(after.run_pending().expect("after frame"), 1);
    assert_eq!(after.pending(), 0);
    scheduler.shutdown();
}
