//! Repository Module
//!
//! Data access layer for the orchestrator.

pub mod task;

// Re-export for convenience
pub use task as task_repository;
pub use task::PgTaskStore;
