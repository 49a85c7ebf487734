//! Deterministic naming of cluster objects and external domains.

use std::sync::LazyLock;

use regex::Regex;

use shipwright_core::ResourceId;
use shipwright_core::service::Service;

static INVALID_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9-]+").expect("static regex"));

/// Sanitize a display name into a DNS-1123 label fragment: lowercase
/// alphanumerics and dashes, no leading/trailing dash, bounded length.
pub fn sanitize(name: &str) -> String {
    let lower = name.to_lowercase();
    let replaced = INVALID_CHARS.replace_all(&lower, "-");
    let mut out: String = replaced.trim_matches('-').chars().take(40).collect();
    while out.ends_with('-') {
        out.pop();
    }
    if out.is_empty() {
        out.push_str("svc");
    }
    out
}

/// Namespace an environment's workloads live in.
pub fn namespace_for(environment_id: ResourceId) -> String {
    format!("env-{}", environment_id.short())
}

/// Base name of every cluster object belonging to a service. Keyed by id,
/// not display name, so renames never orphan resources.
pub fn release_name(service: &Service) -> String {
    format!("svc-{}", service.id.short())
}

/// Name of the NodePort service binding a managed service's primary
/// endpoint externally.
pub fn external_name(service: &Service) -> String {
    format!("{}-ext", release_name(service))
}

/// Name of the ingress routing a managed service's console endpoint.
pub fn console_name(service: &Service) -> String {
    format!("{}-console", release_name(service))
}

/// Cluster-internal DNS name of a service's stable endpoint.
pub fn internal_host(service: &Service, namespace: &str) -> String {
    format!("{}.{namespace}.svc.cluster.local", release_name(service))
}

/// Generated external domain: sanitized name, optional endpoint label and
/// truncated environment id under the platform suffix.
pub fn external_domain(
    name: &str,
    environment_id: ResourceId,
    endpoint: Option<&str>,
    suffix: &str,
) -> String {
    let name = sanitize(name);
    let env = environment_id.short();
    match endpoint {
        Some(label) => format!("{name}-{label}-{env}.{suffix}"),
        None => format!("{name}-{env}.{suffix}"),
    }
}
