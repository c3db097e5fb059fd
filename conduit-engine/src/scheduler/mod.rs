//! Scheduler layer of the engine
//!
//! Drives a workflow task through its stages, and each stage through its
//! jobs. Every transition is written through the task recorder.

pub mod stage;
pub mod workflow;

pub use stage::{approval_decision, run_stage, stage_status};
pub use workflow::run_workflow;
