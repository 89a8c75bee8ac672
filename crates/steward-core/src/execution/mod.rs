//! Step execution: connectors, checkpoints, the engine, and the worker pool.

pub mod checkpoint;
pub mod connector;
pub mod engine;
pub mod worker;

pub use checkpoint::{CheckpointError, CheckpointManager, ResumePoint};
pub use connector::{BoxConnector, Connector, ConnectorRegistry, StepCall};
pub use engine::{EngineError, ExecutionEngine, StepOutcome};
pub use worker::WorkerPool;
