//! Telemetry helpers for structured logging.

use tracing_subscriber::EnvFilter;

/// Default filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "prometheus_vpu=info";

/// Install an env-filtered `fmt` subscriber unless one is already set.
///
/// Applications may install their own subscriber instead; scheduler events are plain `tracing`
/// events. Timer protocol logging (see `SchedulerConfig::log_timer_protocol`) is emitted at info
/// level, so the default filter shows it.
pub fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .try_init();
}
