//! Cluster labels used by Shipwright.

use crate::ResourceId;

/// The `app.kubernetes.io/managed-by` label key, indicating that a
/// resource is managed by Shipwright.
pub const MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Value of [`MANAGED_BY`] on resources this platform owns.
pub const MANAGED_BY_VALUE: &str = "shipwright";

/// Label carrying the owning service id. This is the stable selector for a
/// service's runtime pods; pod names change on replacement, this label does
/// not.
pub const SERVICE_ID: &str = "shipwright.io/service";

/// Label carrying the deployment id, stamped on build jobs.
pub const DEPLOYMENT_ID: &str = "shipwright.io/deployment";

/// Label Kubernetes stamps on every pod a Job creates. Build-log discovery
/// selects on it rather than on pod names.
pub const JOB_NAME: &str = "job-name";

/// Selector matching a service's runtime pods.
pub fn service_selector(service_id: ResourceId) -> String {
    format!("{SERVICE_ID}={service_id}")
}

/// Selector matching the pods of a deployment's build job.
pub fn build_job_selector(deployment_id: ResourceId) -> String {
    format!("{JOB_NAME}={}", crate::deployment::build_job_name(deployment_id))
}
