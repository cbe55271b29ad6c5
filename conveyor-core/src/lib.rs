//! Conveyor Core
//!
//! Core types and abstractions for the Conveyor deployment pipeline orchestrator.
//!
//! This crate contains:
//! - Domain types: build context, stages, pipeline results, deployments, approvals
//! - Configuration: the `build_config.json` file format
//! - Errors: the failure taxonomy and process exit codes
//! - DTOs: payloads for the approval API, notifications and reports

pub mod config;
pub mod domain;
pub mod dto;
pub mod error;

pub use config::BuildConfig;
pub use error::{ConfigError, ErrorKind, Failure};
