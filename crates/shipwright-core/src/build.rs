//! Build collaborator interface.
//!
//! The clone-and-build step runs outside this system. The orchestrator
//! hands it a request and consumes the resulting image reference; how the
//! image gets built is the collaborator's business.

use async_trait::async_trait;
use url::Url;

use crate::{ResourceId, Result};

/// What the build collaborator needs to produce an image.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub deployment_id: ResourceId,
    pub service_id: ResourceId,
    pub repo_url: Url,
    pub branch: String,
    pub commit_sha: Option<String>,
    pub build_command: Option<String>,
    /// Full reference the built image must be pushed as.
    pub image_tag: String,
}

/// Result of a completed build.
#[derive(Debug, Clone)]
pub struct BuiltImage {
    /// Pullable image reference, including registry and tag.
    pub reference: String,
}

/// Trait for the external build step.
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    /// Run the build to completion and return the pushed image reference.
    async fn build(&self, request: BuildRequest) -> Result<BuiltImage>;
}
