//! Service domain model.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::ResourceId;
use crate::managed::ManagedClass;

/// Lifecycle status of a service. Reflects the outcome of the most recent
/// deployment pipeline, not necessarily live cluster truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Inactive,
    Building,
    Running,
    Failed,
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ServiceStatus::Inactive => "inactive",
            ServiceStatus::Building => "building",
            ServiceStatus::Running => "running",
            ServiceStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for ServiceStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "inactive" => Ok(ServiceStatus::Inactive),
            "building" => Ok(ServiceStatus::Building),
            "running" => Ok(ServiceStatus::Running),
            "failed" => Ok(ServiceStatus::Failed),
            other => Err(crate::Error::InvalidInput(format!(
                "unknown service status: {other}"
            ))),
        }
    }
}

/// Source configuration of a git-built service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitSource {
    pub repo_url: Url,
    pub branch: String,
    /// Port the application listens on inside the container.
    pub port: u16,
    pub build_command: Option<String>,
    pub start_command: Option<String>,
}

/// Configuration of a provisioned data-store instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedInstance {
    pub class: ManagedClass,
    /// Image tag override; class default when absent.
    pub version: Option<String>,
    /// Persistent volume size in GiB.
    pub storage_gb: i64,
}

/// What a service is: built from source or provisioned from a class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum ServiceKind {
    Git(GitSource),
    Managed(ManagedInstance),
}

impl ServiceKind {
    pub fn is_git(&self) -> bool {
        matches!(self, ServiceKind::Git(_))
    }

    pub fn is_managed(&self) -> bool {
        matches!(self, ServiceKind::Managed(_))
    }
}

/// Replica scaling mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "mode")]
pub enum Scaling {
    /// A fixed replica count, pinned on the workload.
    Static { replicas: i32 },
    /// An autoscaler owns the replica count within these bounds.
    Elastic { min: i32, max: i32 },
}

/// Container resource limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub cpu: String,
    pub memory: String,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpu: "500m".to_string(),
            memory: "512Mi".to_string(),
        }
    }
}

/// A deployable unit, owned by one project and one environment.
///
/// The environment id doubles as the cluster namespace discriminator. The
/// orchestrator mutates `status`, `generated_domain` and `generated_env`;
/// everything else is owned by configuration updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub id: ResourceId,
    pub project_id: ResourceId,
    pub environment_id: ResourceId,
    pub name: String,
    #[serde(flatten)]
    pub kind: ServiceKind,
    pub limits: ResourceLimits,
    pub scaling: Scaling,
    pub custom_domain: Option<String>,
    pub generated_domain: Option<String>,
    /// Env vars declared by the user.
    pub declared_env: BTreeMap<String, String>,
    /// Env vars the platform generated. Owned by synthesis; credential
    /// values in here must survive every redeploy.
    pub generated_env: BTreeMap<String, String>,
    pub status: ServiceStatus,
    /// Secret authorizing deployment triggers for this service.
    #[serde(skip_serializing, default)]
    pub deploy_secret: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Service {
    /// Declared env merged with generated env. Platform-generated values
    /// win on key collision.
    pub fn merged_env(&self) -> BTreeMap<String, String> {
        let mut env = self.declared_env.clone();
        env.extend(
            self.generated_env
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        env
    }

    /// Domain this service is reachable under, custom first.
    pub fn domain(&self) -> Option<&str> {
        self.custom_domain
            .as_deref()
            .or(self.generated_domain.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn git_service() -> Service {
        Service {
            id: ResourceId::new(),
            project_id: ResourceId::new(),
            environment_id: ResourceId::new(),
            name: "api".to_string(),
            kind: ServiceKind::Git(GitSource {
                repo_url: "https://example.com/org/api.git".parse().unwrap(),
                branch: "main".to_string(),
                port: 8080,
                build_command: None,
                start_command: None,
            }),
            limits: ResourceLimits::default(),
            scaling: Scaling::Static { replicas: 1 },
            custom_domain: None,
            generated_domain: None,
            declared_env: BTreeMap::new(),
            generated_env: BTreeMap::new(),
            status: ServiceStatus::Inactive,
            deploy_secret: "secret".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn generated_env_wins_on_collision() {
        let mut service = git_service();
        service
            .declared_env
            .insert("PORT".to_string(), "3000".to_string());
        service
            .generated_env
            .insert("PORT".to_string(), "8080".to_string());

        assert_eq!(service.merged_env().get("PORT").unwrap(), "8080");
    }

    #[test]
    fn custom_domain_takes_precedence() {
        let mut service = git_service();
        service.generated_domain = Some("api-abc123.apps.example".to_string());
        assert_eq!(service.domain(), Some("api-abc123.apps.example"));

        service.custom_domain = Some("api.example.com".to_string());
        assert_eq!(service.domain(), Some("api.example.com"));
    }

    #[test]
    fn status_round_trips() {
        for status in [
            ServiceStatus::Inactive,
            ServiceStatus::Building,
            ServiceStatus::Running,
            ServiceStatus::Failed,
        ] {
            let parsed: ServiceStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn deploy_secret_never_serializes() {
        let service = git_service();
        let json = serde_json::to_value(&service).unwrap();
        assert!(json.get("deploySecret").is_none());
    }
}
