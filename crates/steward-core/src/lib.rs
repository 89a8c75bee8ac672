//! Orchestration logic and repository trait definitions for Steward.
//!
//! This crate defines the "ports" (repository traits) that the infrastructure
//! layer implements, plus the orchestration core built on them: lifecycle
//! controller, checkpointed execution engine, failure recovery, and health
//! monitoring. It depends only on `steward-types` -- never on
//! `steward-infra` or any database/IO crate.

pub mod clock;
pub mod event;
pub mod execution;
pub mod lifecycle;
pub mod monitor;
pub mod orchestrator;
pub mod recovery;
pub mod repository;

#[cfg(test)]
pub(crate) mod test_support;
