//! Conveyor Engine
//!
//! Executes deployment pipelines described by `conveyor-core` types.
//!
//! Architecture:
//! - Command: external process execution with timeouts and cancellation
//! - Context: the per-run workspace, build context and log buffer
//! - Services: artifact store, stage executor, pipeline engine, approval
//!   gate, deployment controller, post-hooks
//! - Cluster/Manifest: kubectl client and manifest templating
//! - API: HTTP endpoints for submitting approval decisions
//!
//! A run resolves its source identity, builds one [`context::RunContext`],
//! and hands the stage list to [`service::PipelineEngine`].

pub mod api;
pub mod cancel;
pub mod cluster;
pub mod command;
pub mod config;
pub mod context;
pub mod manifest;
pub mod pipeline;
pub mod service;
pub mod source;

pub use cancel::{CancelReason, CancelSignal};
pub use command::{CommandRunner, DryRunRunner, ProcessRunner};
pub use config::EngineConfig;
pub use context::RunContext;
