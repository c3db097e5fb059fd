//! Service Module
//!
//! Business logic layer for the orchestrator.
//! Services validate requests and delegate to the workflow engine.

pub mod environment;
pub mod task;

// Re-export for convenience
pub use environment as environment_service;
pub use task as task_service;
