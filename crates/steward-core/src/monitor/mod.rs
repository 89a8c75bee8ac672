//! Health monitoring and human escalation.

pub mod escalation;
pub mod health;

pub use escalation::{AlertDraft, EscalationDispatcher};
pub use health::{HealthMonitor, render_report};
