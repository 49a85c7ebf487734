//! Resource synthesizer interface.
//!
//! Synthesis turns a service definition into a cluster resource set and
//! applies it as one logical unit. Implementations live elsewhere; the
//! orchestrator only sees this trait.

use std::net::IpAddr;

use async_trait::async_trait;
use serde::Serialize;

use crate::service::Service;
use crate::{Error, Result};

/// Failure of an atomic-apply operation.
///
/// Carries the partially mutated service so the caller can persist
/// best-effort state. The caller must assume the resource set was applied
/// incompletely; the only retry is a fresh deployment.
#[derive(Debug)]
pub struct SynthesisFailure {
    pub partial: Service,
    pub error: Error,
}

/// Live workload state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadStatus {
    pub desired_replicas: i32,
    pub ready_replicas: i32,
    pub image: Option<String>,
}

/// Live state of a cluster-internal endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointStatus {
    pub cluster_ip: Option<String>,
    pub ports: Vec<i32>,
}

/// Live state of an externally bound endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalStatus {
    pub node_ports: Vec<i32>,
}

/// Live ingress state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressStatus {
    pub hosts: Vec<String>,
}

/// Live autoscaler state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoscalerStatus {
    pub min_replicas: i32,
    pub max_replicas: i32,
    pub current_replicas: i32,
}

/// Cross-check of a service's resource set against live cluster state.
/// A resource type the cluster no longer has is omitted, never an error.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workload: Option<WorkloadStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<EndpointStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external: Option<ExternalStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingress: Option<IngressStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub autoscaler: Option<AutoscalerStatus>,
}

impl ResourceStatus {
    /// Whether any resource of the set still exists in the cluster.
    pub fn any_present(&self) -> bool {
        self.workload.is_some()
            || self.endpoint.is_some()
            || self.external.is_some()
            || self.ingress.is_some()
            || self.autoscaler.is_some()
    }
}

/// Trait for resource synthesis backends.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Apply the resource set for a git service running `image`. Returns
    /// the service updated with status, domain and generated env.
    async fn deploy_git(
        &self,
        image: &str,
        service: &Service,
    ) -> std::result::Result<Service, SynthesisFailure>;

    /// Apply the resource set for a managed service, binding its primary
    /// endpoint to an externally reachable port on `host_ip`.
    async fn deploy_managed(
        &self,
        service: &Service,
        host_ip: IpAddr,
    ) -> std::result::Result<Service, SynthesisFailure>;

    /// Read-only cross-check against live cluster state.
    async fn resource_status(&self, service: &Service) -> Result<ResourceStatus>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_status_reports_nothing_present() {
        let status = ResourceStatus::default();
        assert!(!status.any_present());
    }

    #[test]
    fn missing_resources_are_omitted_from_wire_output() {
        let status = ResourceStatus {
            workload: Some(WorkloadStatus {
                desired_replicas: 2,
                ready_replicas: 2,
                image: None,
            }),
            ..Default::default()
        };
        let json = serde_json::to_value(&status).unwrap();
        assert!(json.get("workload").is_some());
        assert!(json.get("ingress").is_none());
        assert!(json.get("autoscaler").is_none());
    }
}
