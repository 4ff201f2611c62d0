//! Tests for configuration validation and loading

use std::collections::HashMap;

use prometheus_vpu::config::{Environment, SchedulerConfig, DEFAULT_MAX_ROUNDS};

fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    move |key| vars.get(key).cloned()
}

#[test]
fn test_presets_are_valid() {
    assert!(SchedulerConfig::production().validate().is_ok());
    assert!(SchedulerConfig::development().validate().is_ok());
}

#[test]
fn test_invalid_max_rounds() {
    let invalid = SchedulerConfig {
        max_rounds: 0,
        ..SchedulerConfig::development()
    };
    assert!(invalid.validate().is_err());
}

#[test]
fn test_protocol_logging_requires_worker() {
    let invalid = SchedulerConfig {
        log_timer_protocol: true,
        ..SchedulerConfig::development()
    };
    assert!(invalid.validate().is_err());

    let valid = SchedulerConfig {
        log_timer_protocol: true,
        use_isolated_worker_for_timers: true,
        ..SchedulerConfig::development()
    };
    assert!(valid.validate().is_ok());
}

#[test]
fn test_from_json_fills_missing_fields() {
    let cfg = SchedulerConfig::from_json_str(r#"{ "max_rounds": 7, "enable_names": false }"#)
        .expect("valid json");
    assert_eq!(cfg.max_rounds, 7);
    assert!(!cfg.enable_names);
    assert_eq!(cfg.idle_budget, SchedulerConfig::default().idle_budget);
}

#[test]
fn test_from_json_rejects_invalid_values() {
    assert!(SchedulerConfig::from_json_str(r#"{ "max_rounds": 0 }"#).is_err());
    assert!(SchedulerConfig::from_json_str("not json").is_err());
}

#[test]
fn test_environment_preset_with_overrides() {
    let cfg = SchedulerConfig::from_lookup(lookup(&[
        ("PROMETHEUS_VPU_ENVIRONMENT", "production"),
        ("PROMETHEUS_VPU_CHECK_INVARIANTS", "true"),
        ("PROMETHEUS_VPU_MAX_ROUNDS", "12"),
    ]))
    .expect("valid variables");
    assert!(!cfg.enable_names);
    assert!(cfg.check_invariants);
    assert_eq!(cfg.max_rounds, 12);
}

#[test]
fn test_environment_defaults_without_variables() {
    let cfg = SchedulerConfig::from_lookup(lookup(&[])).expect("defaults are valid");
    assert_eq!(cfg, SchedulerConfig::default());
    assert_eq!(cfg.max_rounds, DEFAULT_MAX_ROUNDS);
}

#[test]
fn test_environment_rejects_bad_values() {
    let err = SchedulerConfig::from_lookup(lookup(&[("PROMETHEUS_VPU_MAX_ROUNDS", "many")]))
        .unwrap_err();
    assert!(err.contains("PROMETHEUS_VPU_MAX_ROUNDS"));
    assert!(SchedulerConfig::from_lookup(lookup(&[("PROMETHEUS_VPU_ENVIRONMENT", "staging")])).is_err());
}

#[test]
fn test_environment_parse() {
    assert_eq!("Production".parse::<Environment>(), Ok(Environment::Production));
    assert_eq!(" development ".parse::<Environment>(), Ok(Environment::Development));
}
