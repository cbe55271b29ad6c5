//! Core domain types
//!
//! This module contains the core domain structures used across Conveyor crates.
//! These types are plain data: the engine executes them, the CLI reports them.

pub mod approval;
pub mod artifact;
pub mod context;
pub mod deployment;
pub mod log;
pub mod pipeline;
pub mod stage;
