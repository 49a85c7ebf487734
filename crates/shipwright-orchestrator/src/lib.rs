//! Deployment lifecycle orchestration.
//!
//! Owns the path from an accepted trigger to a terminal deployment state:
//! detached build-and-synthesize pipelines, their supervisory registry,
//! and the webhook fired on each outcome.

pub mod notifier;
pub mod orchestrator;
pub mod pipelines;

pub use notifier::{WebhookNotifier, WebhookPayload};
pub use orchestrator::{
    CreateDeployment, DeploymentOrchestrator, DeploymentReceipt, OrchestratorConfig,
};
pub use pipelines::PipelineSet;
