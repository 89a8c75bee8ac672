//! Observability setup for Steward: structured logging with optional
//! OpenTelemetry trace export.

pub mod tracing_setup;
