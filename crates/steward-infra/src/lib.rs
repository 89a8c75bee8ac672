//! Infrastructure layer for Steward.
//!
//! Contains implementations of the ports defined in `steward-core`: SQLite
//! storage for every repository trait, the rule-based planner, HTTP and
//! local connectors, and configuration loading.

pub mod config;
pub mod connector;
pub mod planner;
pub mod sqlite;
