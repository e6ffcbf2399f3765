//! Small shared utilities.

pub mod ids;
pub mod telemetry;
