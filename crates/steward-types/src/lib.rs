//! Shared domain types for Steward.
//!
//! This crate contains the domain types used across the orchestrator:
//! Task, Checkpoint, ApprovalRequest, ErrorRecord, CircuitBreakerState,
//! Alert, HealthReport, configuration, and their error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod alert;
pub mod approval;
pub mod breaker;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod event;
pub mod failure;
pub mod health;
pub mod task;
