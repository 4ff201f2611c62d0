//! Tests for builder modules

use std::sync::Arc;

use prometheus_vpu::builders::SchedulerBuilder;
use prometheus_vpu::config::SchedulerConfig;
use prometheus_vpu::core::{Executor, ExecutorKind, Task};
use prometheus_vpu::runtime::{ManualTrigger, Phase, Scheduler};

#[test]
fn test_builder_rejects_invalid_config() {
    let config = SchedulerConfig {
        max_rounds: 0,
        ..SchedulerConfig::development()
    };
    let err = SchedulerBuilder::new(config).build().unwrap_err();
    assert_eq!(err.code(), "backend");
    assert!(err.to_string().contains("config invalid"));
}

#[test]
fn test_vpu_names_follow_config() {
    let named = Scheduler::new(SchedulerConfig::development()).expect("scheduler");
    let names: Vec<_> = Phase::ALL
        .iter()
        .map(|phase| named.vpu(*phase).name().map(ToString::to_string))
        .collect();
    assert_eq!(
        names,
        vec![
            Some("Macro".to_string()),
            Some("Micro".to_string()),
            Some("AnimationFrame".to_string()),
            Some("AfterFrame".to_string()),
            Some("OnIdle".to_string()),
        ]
    );
    named.shutdown();

    let anonymous = Scheduler::new(SchedulerConfig::production()).expect("scheduler");
    assert!(Phase::ALL.iter().all(|phase| anonymous.vpu(*phase).name().is_none()));
    anonymous.shutdown();
}

#[test]
fn test_vpus_have_distinct_identities() {
    let scheduler = Scheduler::new(SchedulerConfig::production()).expect("scheduler");
    let mut ids: Vec<u64> = Phase::ALL
        .iter()
        .map(|phase| scheduler.vpu(*phase).info().id())
        .collect();
    ids.dedup();
    assert_eq!(ids.len(), Phase::ALL.len());
    scheduler.shutdown();
}

#[test]
fn test_custom_trigger_and_executor() {
    let trigger = Arc::new(ManualTrigger::new());
    let scheduler = Scheduler::builder(SchedulerConfig::development())
        .with_trigger(Phase::AnimationFrame, trigger.clone())
        .with_executor(Phase::AnimationFrame, ExecutorKind::DeadlineBased)
        .build()
        .expect("scheduler");

    scheduler
        .animation_frame(Task::new(|| {}))
        .expect("queue");
    assert_eq!(trigger.pending(), 1);

    // Without a deadline the deadline-based executor yields at once and asks again.
    trigger.run_pending().expect("activation");
    assert_eq!(scheduler.animation_frame_vpu().executor().queue_size(), 1);
    assert_eq!(trigger.pending(), 1);
    scheduler.shutdown();
}
