//! Deployment records and their state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ResourceId;

/// Status of one build-and-release attempt.
///
/// Created `Building`; moves exactly once to a terminal state. There is no
/// retry transition; retrying means creating a new deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Building,
    Success,
    Failed,
}

impl DeploymentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, DeploymentStatus::Success | DeploymentStatus::Failed)
    }
}

impl std::fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DeploymentStatus::Building => "building",
            DeploymentStatus::Success => "success",
            DeploymentStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for DeploymentStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "building" => Ok(DeploymentStatus::Building),
            "success" => Ok(DeploymentStatus::Success),
            "failed" => Ok(DeploymentStatus::Failed),
            other => Err(crate::Error::InvalidInput(format!(
                "unknown deployment status: {other}"
            ))),
        }
    }
}

/// Name of the cluster Job the build collaborator runs for a deployment.
pub fn build_job_name(deployment_id: ResourceId) -> String {
    format!("build-{deployment_id}")
}

/// One build-and-release attempt for a service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    pub id: ResourceId,
    pub service_id: ResourceId,
    /// Source commit, git services only.
    pub commit_sha: Option<String>,
    pub commit_message: Option<String>,
    /// Image reference produced by the build. Set once, on build completion.
    pub image: Option<String>,
    pub status: DeploymentStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Deployment {
    pub fn new(
        service_id: ResourceId,
        commit_sha: Option<String>,
        commit_message: Option<String>,
    ) -> Self {
        Self {
            id: ResourceId::new(),
            service_id,
            commit_sha,
            commit_message,
            image: None,
            status: DeploymentStatus::Building,
            error: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Reference handed to clients for locating the build job.
    pub fn job_reference(&self) -> String {
        build_job_name(self.id)
    }
}
