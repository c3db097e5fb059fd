//! Conduit Engine
//!
//! Workflow task execution engine.
//!
//! This crate contains:
//! - Job configurators: expand workflow job definitions into job tasks
//! - Controllers: drive each job task against clusters and external systems
//! - Scheduler: runs stages and jobs, approvals and breakpoints included
//! - Recorder and store: persist the task document as it changes
//! - Engine: the submission surface tying it all together

pub mod ack;
pub mod catalog;
pub mod config;
pub mod context;
pub mod control;
pub mod controller;
pub mod engine;
pub mod error;
pub mod infra;
pub mod job;
pub mod migrate;
pub mod render;
pub mod scheduler;
pub mod step;
pub mod store;
pub mod values;

#[cfg(test)]
mod testutil;

pub use config::{EngineConfig, License};
pub use engine::Engine;
pub use error::{EngineError, Result};
