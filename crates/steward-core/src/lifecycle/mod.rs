//! Task lifecycle: the guarded state machine and plan admission.

pub mod controller;
pub mod planner;

pub use controller::{TaskController, TransitionError};
pub use planner::Planner;
