//! Conduit Core
//!
//! Core types for the Conduit workflow engine.
//!
//! This crate contains:
//! - Domain types: workflows, tasks, job specs, environments
//! - DTOs: requests and responses of the task submission surface

pub mod domain;
pub mod dto;
