// Domain layer - Telemetry models and typed errors
pub mod chart;
pub mod error;
pub mod reading;
pub mod statistics;
