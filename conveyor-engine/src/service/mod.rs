//! Service layer
//!
//! Services contain the orchestration logic of a run: artifact storage,
//! stage execution, pipeline sequencing, the approval gate, deployments,
//! post-hooks, health probing and notification.
//!
//! Services with external collaborators are trait-based to enable testing
//! and dependency injection.

pub mod approval;
pub mod artifact_store;
pub mod builtin;
pub mod deployment;
pub mod health;
pub mod hooks;
pub mod log_buffer;
pub mod notifier;
pub mod pipeline_engine;
pub mod stage_executor;

// Re-export traits
pub use artifact_store::ArtifactStore;
pub use health::HealthProbe;
pub use log_buffer::LogBufferService;
pub use notifier::Notifier;
pub use stage_executor::StageExecutor;

// Re-export implementations
pub use approval::{ApprovalError, ApprovalGate};
pub use artifact_store::{ArtifactError, FsArtifactStore};
pub use builtin::BuiltinSteps;
pub use deployment::{DeploySettings, DeploymentController};
pub use health::{DryRunHealthProbe, HttpHealthProbe};
pub use hooks::HookRunner;
pub use log_buffer::InMemoryLogBuffer;
pub use notifier::{TracingNotifier, WebhookNotifier};
pub use pipeline_engine::PipelineEngine;
pub use stage_executor::StandardStageExecutor;
