//! Core domain types
//!
//! Workflow definitions, the task documents they expand into, and the
//! environment records jobs are configured against. Shared by the engine
//! (execution) and the orchestrator (persistence).

pub mod environment;
pub mod integration;
pub mod job_spec;
pub mod job_type;
pub mod status;
pub mod step;
pub mod task;
pub mod task_spec;
pub mod workflow;
