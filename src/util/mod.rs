//! Utilities: tracing setup and diagnostic names.

pub mod names;
pub mod telemetry;

pub use names::NameGenerator;
pub use telemetry::*;
