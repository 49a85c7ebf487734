//! Resource plans for git-built services.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::core::v1::Service as KubeService;
use k8s_openapi::api::networking::v1::Ingress;
use serde_json::{Value, json};

use shipwright_core::service::{GitSource, Scaling, Service};
use shipwright_core::{Error, Result, labels};

use crate::names;

/// The resource set realizing one git service, in apply order.
#[derive(Debug, Clone)]
pub struct GitPlan {
    pub workload: Deployment,
    pub endpoint: KubeService,
    pub ingress: Option<Ingress>,
    pub autoscaler: Option<HorizontalPodAutoscaler>,
}

fn object_labels(service: &Service) -> Value {
    json!({
        labels::MANAGED_BY: labels::MANAGED_BY_VALUE,
        labels::SERVICE_ID: service.id.to_string(),
    })
}

fn parse<T: serde::de::DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| Error::Internal(format!("bad manifest: {e}")))
}

/// Compute the full plan for a git service running `image`. `domain` is the
/// routed domain, custom or generated, when the service needs one.
pub fn plan(
    service: &Service,
    git: &GitSource,
    image: &str,
    domain: Option<&str>,
) -> Result<GitPlan> {
    Ok(GitPlan {
        workload: workload(service, git, image)?,
        endpoint: endpoint(service, git)?,
        ingress: domain.map(|host| ingress(service, git, host)).transpose()?,
        autoscaler: match service.scaling {
            Scaling::Elastic { min, max } => Some(autoscaler(service, min, max)?),
            Scaling::Static { .. } => None,
        },
    })
}

fn workload(service: &Service, git: &GitSource, image: &str) -> Result<Deployment> {
    let name = names::release_name(service);
    // Elastic services leave the replica field to the autoscaler.
    let replicas = match service.scaling {
        Scaling::Static { replicas } => Some(replicas),
        Scaling::Elastic { .. } => None,
    };
    let env: Vec<Value> = service
        .merged_env()
        .into_iter()
        .map(|(name, value)| json!({ "name": name, "value": value }))
        .collect();
    let command: Option<Vec<String>> = git
        .start_command
        .as_ref()
        .map(|cmd| vec!["/bin/sh".into(), "-c".into(), cmd.clone()]);

    parse(json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": { "name": name, "labels": object_labels(service) },
        "spec": {
            "replicas": replicas,
            "selector": { "matchLabels": { labels::SERVICE_ID: service.id.to_string() } },
            "template": {
                "metadata": { "labels": object_labels(service) },
                "spec": {
                    "containers": [{
                        "name": "app",
                        "image": image,
                        "command": command,
                        "ports": [{ "containerPort": git.port }],
                        "env": env,
                        "resources": {
                            "limits": {
                                "cpu": service.limits.cpu,
                                "memory": service.limits.memory,
                            },
                        },
                    }],
                },
            },
        },
    }))
}

fn endpoint(service: &Service, git: &GitSource) -> Result<KubeService> {
    parse(json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": { "name": names::release_name(service), "labels": object_labels(service) },
        "spec": {
            "selector": { labels::SERVICE_ID: service.id.to_string() },
            "ports": [{ "port": git.port, "targetPort": git.port }],
        },
    }))
}

fn ingress(service: &Service, git: &GitSource, host: &str) -> Result<Ingress> {
    parse(json!({
        "apiVersion": "networking.k8s.io/v1",
        "kind": "Ingress",
        "metadata": { "name": names::release_name(service), "labels": object_labels(service) },
        "spec": {
            "rules": [{
                "host": host,
                "http": {
                    "paths": [{
                        "path": "/",
                        "pathType": "Prefix",
                        "backend": {
                            "service": {
                                "name": names::release_name(service),
                                "port": { "number": git.port },
                            },
                        },
                    }],
                },
            }],
        },
    }))
}

fn autoscaler(service: &Service, min: i32, max: i32) -> Result<HorizontalPodAutoscaler> {
    parse(json!({
        "apiVersion": "autoscaling/v2",
        "kind": "HorizontalPodAutoscaler",
        "metadata": { "name": names::release_name(service), "labels": object_labels(service) },
        "spec": {
            "scaleTargetRef": {
                "apiVersion": "apps/v1",
                "kind": "Deployment",
                "name": names::release_name(service),
            },
            "minReplicas": min,
            "maxReplicas": max,
            "metrics": [{
                "type": "Resource",
                "resource": {
                    "name": "cpu",
                    "target": { "type": "Utilization", "averageUtilization": 80 },
                },
            }],
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use shipwright_core::ResourceId;
    use shipwright_core::service::{ResourceLimits, ServiceKind, ServiceStatus};
    use std::collections::BTreeMap;

    fn service(scaling: Scaling) -> (Service, GitSource) {
        let git = GitSource {
            repo_url: "https://example.com/org/app.git".parse().unwrap(),
            branch: "main".to_string(),
            port: 8080,
            build_command: None,
            start_command: None,
        };
        let service = Service {
            id: ResourceId::new(),
            project_id: ResourceId::new(),
            environment_id: ResourceId::new(),
            name: "app".to_string(),
            kind: ServiceKind::Git(git.clone()),
            limits: ResourceLimits::default(),
            scaling,
            custom_domain: None,
            generated_domain: None,
            declared_env: BTreeMap::new(),
            generated_env: BTreeMap::new(),
            status: ServiceStatus::Inactive,
            deploy_secret: "s".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        (service, git)
    }

    #[test]
    fn static_scaling_pins_replicas_and_skips_the_autoscaler() {
        let (service, git) = service(Scaling::Static { replicas: 2 });
        let plan = plan(&service, &git, "registry/app:sha123", None).unwrap();

        let spec = plan.workload.spec.unwrap();
        assert_eq!(spec.replicas, Some(2));
        assert!(plan.autoscaler.is_none());
        assert_eq!(
            spec.template.spec.unwrap().containers[0].image.as_deref(),
            Some("registry/app:sha123")
        );
    }

    #[test]
    fn elastic_scaling_adds_one_autoscaler_and_unpins_replicas() {
        let (service, git) = service(Scaling::Elastic { min: 1, max: 5 });
        let plan = plan(&service, &git, "registry/app:sha123", None).unwrap();

        assert_eq!(plan.workload.spec.unwrap().replicas, None);
        let hpa = plan.autoscaler.unwrap().spec.unwrap();
        assert_eq!(hpa.min_replicas, Some(1));
        assert_eq!(hpa.max_replicas, 5);
    }

    #[test]
    fn no_domain_means_no_ingress() {
        let (service, git) = service(Scaling::Static { replicas: 1 });
        let plan = plan(&service, &git, "registry/app:v1", None).unwrap();
        assert!(plan.ingress.is_none());
    }

    #[test]
    fn domain_produces_a_routed_ingress() {
        let (service, git) = service(Scaling::Static { replicas: 1 });
        let plan = plan(&service, &git, "registry/app:v1", Some("app.example.com")).unwrap();

        let ingress = plan.ingress.unwrap();
        let rules = ingress.spec.unwrap().rules.unwrap();
        assert_eq!(rules[0].host.as_deref(), Some("app.example.com"));
    }

    #[test]
    fn declared_and_generated_env_reach_the_container() {
        let (mut service, git) = service(Scaling::Static { replicas: 1 });
        service
            .declared_env
            .insert("FEATURE_FLAG".to_string(), "on".to_string());
        service
            .generated_env
            .insert("PORT".to_string(), "8080".to_string());

        let plan = plan(&service, &git, "registry/app:v1", None).unwrap();
        let containers = plan.workload.spec.unwrap().template.spec.unwrap().containers;
        let env = containers[0].env.as_ref().unwrap();
        let names: Vec<_> = env.iter().map(|e| e.name.as_str()).collect();
        assert!(names.contains(&"FEATURE_FLAG"));
        assert!(names.contains(&"PORT"));
    }

    #[test]
    fn pod_selector_matches_the_stable_service_label() {
        let (service, git) = service(Scaling::Static { replicas: 1 });
        let plan = plan(&service, &git, "registry/app:v1", None).unwrap();

        let selector = plan.workload.spec.unwrap().selector;
        let matched = selector.match_labels.unwrap();
        assert_eq!(
            matched.get(labels::SERVICE_ID),
            Some(&service.id.to_string())
        );
    }
}
