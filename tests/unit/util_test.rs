//! Tests for utility functions

use prometheus_vpu::util::{NameGenerator, DEFAULT_FILTER};

#[test]
fn test_disabled_generator_yields_no_names() {
    let names = NameGenerator::new(false);
    assert!(!names.is_enabled());
    assert_eq!(names.generate("MacroTask", Some("Explicit")), None);
    assert_eq!(names.generate("MacroTask", None), None);
}

#[test]
fn test_generator_counter_shared_across_prefixes() {
    let names = NameGenerator::new(true);
    assert_eq!(names.generate("MicroTask", None).as_deref(), Some("MicroTask@1"));
    assert_eq!(names.generate("PeriodicTask", None).as_deref(), Some("PeriodicTask@2"));
}

#[test]
fn test_default_filter_targets_crate() {
    assert!(DEFAULT_FILTER.starts_with("prometheus_vpu"));
}

#[test]
fn test_init_tracing_is_idempotent() {
    prometheus_vpu::util::init_tracing();
    prometheus_vpu::util::init_tracing();
}
