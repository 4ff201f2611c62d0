//! Scheduler configuration: feature switches, presets and loading.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Prefix of every environment variable read by [`SchedulerConfig::from_env`].
pub const ENV_PREFIX: &str = "PROMETHEUS_VPU_";

/// Default round budget of round-based executors.
pub const DEFAULT_MAX_ROUNDS: u32 = 100;

/// Default budget, in milliseconds, the idle trigger grants each activation.
pub const DEFAULT_IDLE_BUDGET: u64 = 50;

/// Preset selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    /// Diagnostics off.
    Production,
    /// Names, error handlers and invariant checks on.
    Development,
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "production" => Ok(Self::Production),
            "development" => Ok(Self::Development),
            other => Err(format!("unknown environment `{other}`")),
        }
    }
}

/// Root scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Keep diagnostic names for VPUs and tasks.
    pub enable_names: bool,
    /// Deliver uncaught task errors to registered handlers.
    pub enable_uncaught_error_handlers: bool,
    /// Detect caller bugs and return invariant errors.
    pub check_invariants: bool,
    /// Empty the queue when runaway tasks are detected.
    pub purge_tasks_on_runaway: bool,
    /// Consecutive rounds a round-based executor runs before declaring runaway tasks.
    pub max_rounds: u32,
    /// Run timers on the isolated worker backend instead of the thread-pool backend.
    pub use_isolated_worker_for_timers: bool,
    /// Log every timer protocol message. Worker backend only.
    pub log_timer_protocol: bool,
    /// Milliseconds of budget the idle trigger grants each activation.
    pub idle_budget: u64,
}

impl SchedulerConfig {
    /// Diagnostics off: no names, no error handlers, no invariant checks.
    #[must_use]
    pub const fn production() -> Self {
        Self {
            enable_names: false,
            enable_uncaught_error_handlers: false,
            check_invariants: false,
            purge_tasks_on_runaway: true,
            max_rounds: DEFAULT_MAX_ROUNDS,
            use_isolated_worker_for_timers: false,
            log_timer_protocol: false,
            idle_budget: DEFAULT_IDLE_BUDGET,
        }
    }

    /// Diagnostics on: names, error handlers and invariant checks.
    #[must_use]
    pub const fn development() -> Self {
        Self {
            enable_names: true,
            enable_uncaught_error_handlers: true,
            check_invariants: true,
            ..Self::production()
        }
    }

    /// The preset for `environment`.
    #[must_use]
    pub const fn for_environment(environment: Environment) -> Self {
        match environment {
            Environment::Production => Self::production(),
            Environment::Development => Self::development(),
        }
    }

    /// Validate configuration values and combinations.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_rounds == 0 {
            return Err("max_rounds must be greater than 0".into());
        }
        if self.idle_budget == 0 {
            return Err("idle_budget must be greater than 0".into());
        }
        if self.log_timer_protocol && !self.use_isolated_worker_for_timers {
            return Err(
                "log_timer_protocol requires use_isolated_worker_for_timers".into(),
            );
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate. Missing fields take their
    /// [`Default`] values.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from the process environment, reading a `.env` file first when one exists.
    ///
    /// `PROMETHEUS_VPU_ENVIRONMENT` selects the preset; per-field variables such as
    /// `PROMETHEUS_VPU_MAX_ROUNDS` override it.
    pub fn from_env() -> Result<Self, String> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source; `lookup` receives full variable names.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |field: &str| lookup(&format!("{ENV_PREFIX}{field}"));
        let mut cfg = match var("ENVIRONMENT") {
            Some(value) => Self::for_environment(value.parse()?),
            None => Self::default(),
        };
        override_with(&var, "ENABLE_NAMES", &mut cfg.enable_names)?;
        override_with(
            &var,
            "ENABLE_UNCAUGHT_ERROR_HANDLERS",
            &mut cfg.enable_uncaught_error_handlers,
        )?;
        override_with(&var, "CHECK_INVARIANTS", &mut cfg.check_invariants)?;
        override_with(&var, "PURGE_TASKS_ON_RUNAWAY", &mut cfg.purge_tasks_on_runaway)?;
        override_with(&var, "MAX_ROUNDS", &mut cfg.max_rounds)?;
        override_with(
            &var,
            "USE_ISOLATED_WORKER_FOR_TIMERS",
            &mut cfg.use_isolated_worker_for_timers,
        )?;
        override_with(&var, "LOG_TIMER_PROTOCOL", &mut cfg.log_timer_protocol)?;
        override_with(&var, "IDLE_BUDGET", &mut cfg.idle_budget)?;
        cfg.validate()?;
        Ok(cfg)
    }
}

fn override_with<T>(
    var: &impl Fn(&str) -> Option<String>,
    field: &str,
    target: &mut T,
) -> Result<(), String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(value) = var(field) {
        *target = value
            .trim()
            .parse()
            .map_err(|e| format!("{ENV_PREFIX}{field}: invalid value `{value}`: {e}"))?;
    }
    Ok(())
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::development()
        } else {
            Self::production()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_presets() {
        let production = SchedulerConfig::production();
        assert!(!production.enable_names);
        assert!(!production.check_invariants);
        assert!(production.purge_tasks_on_runaway);
        assert_eq!(production.max_rounds, 100);

        let development = SchedulerConfig::development();
        assert!(development.enable_names);
        assert!(development.enable_uncaught_error_handlers);
        assert!(development.check_invariants);
        assert!(development.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let cfg = SchedulerConfig {
            max_rounds: 0,
            ..SchedulerConfig::development()
        };
        assert!(cfg.validate().unwrap_err().contains("max_rounds"));

        let cfg = SchedulerConfig {
            log_timer_protocol: true,
            ..SchedulerConfig::development()
        };
        assert!(cfg.validate().unwrap_err().contains("log_timer_protocol"));
    }

    #[test]
    fn test_env_preset_and_overrides() {
        let cfg = SchedulerConfig::from_lookup(lookup(&[
            ("PROMETHEUS_VPU_ENVIRONMENT", "production"),
            ("PROMETHEUS_VPU_CHECK_INVARIANTS", "true"),
            ("PROMETHEUS_VPU_MAX_ROUNDS", " 7 "),
        ]))
        .unwrap();
        assert!(!cfg.enable_names);
        assert!(cfg.check_invariants);
        assert_eq!(cfg.max_rounds, 7);
    }

    #[test]
    fn test_env_rejects_garbage() {
        let err = SchedulerConfig::from_lookup(lookup(&[("PROMETHEUS_VPU_MAX_ROUNDS", "many")]))
            .unwrap_err();
        assert!(err.contains("PROMETHEUS_VPU_MAX_ROUNDS"));
        let err = SchedulerConfig::from_lookup(lookup(&[("PROMETHEUS_VPU_ENVIRONMENT", "staging")]))
            .unwrap_err();
        assert!(err.contains("staging"));
    }
}
