//! Data Transfer Objects for the task submission surface

pub mod task;
