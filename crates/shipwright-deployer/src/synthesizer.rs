//! Atomic application of resource plans against the cluster.

use std::fmt::Debug;
use std::net::IpAddr;

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::core::v1::Service as KubeService;
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{Api, DeleteParams, Patch, PatchParams};
use kube::{Client, Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use shipwright_core::service::{Service, ServiceKind, ServiceStatus};
use shipwright_core::synth::{
    AutoscalerStatus, EndpointStatus, ExternalStatus, IngressStatus, ResourceStatus,
    SynthesisFailure, Synthesizer, WorkloadStatus,
};
use shipwright_core::{Error, Result};

use crate::env::{self, ManagedEndpoints};
use crate::ports::PortAllocator;
use crate::{git, managed, names};

/// Configuration of the synthesizer.
#[derive(Debug, Clone)]
pub struct SynthesizerConfig {
    /// Platform suffix every generated domain lives under.
    pub domain_suffix: String,
}

impl Default for SynthesizerConfig {
    fn default() -> Self {
        Self {
            domain_suffix: std::env::var("SHIPWRIGHT_DOMAIN_SUFFIX")
                .unwrap_or_else(|_| "apps.shipwright.local".to_string()),
        }
    }
}

/// Kubernetes-backed synthesizer. Holds the one shared cluster client; it
/// is injected at startup and reused for every call.
pub struct KubeSynthesizer {
    client: Client,
    config: SynthesizerConfig,
    allocator: PortAllocator,
}

impl KubeSynthesizer {
    pub fn new(client: Client, config: SynthesizerConfig) -> Self {
        Self {
            client,
            config,
            allocator: PortAllocator::new(),
        }
    }

    fn apply_params() -> PatchParams {
        PatchParams::apply("shipwright").force()
    }

    /// Server-side apply of one object under the platform field manager.
    async fn apply<K>(&self, namespace: &str, obj: &K) -> Result<()>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Serialize
            + DeserializeOwned
            + Clone
            + Debug,
    {
        let name = obj.name_any();
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        api.patch(&name, &Self::apply_params(), &Patch::Apply(obj))
            .await
            .map_err(|e| Error::Cluster(format!("apply {name}: {e}")))?;
        Ok(())
    }

    /// Delete an object, treating absence as success.
    async fn delete_if_exists<K>(&self, namespace: &str, name: &str) -> Result<()>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(Error::Cluster(format!("delete {name}: {e}"))),
        }
    }

    async fn get_opt<K>(&self, namespace: &str, name: &str) -> Result<Option<K>>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name)
            .await
            .map_err(|e| Error::Cluster(format!("get {name}: {e}")))
    }

    async fn apply_git(&self, image: &str, svc: &mut Service) -> Result<()> {
        let ServiceKind::Git(git_source) = svc.kind.clone() else {
            return Err(Error::InvalidInput(format!(
                "service {} is not a git service",
                svc.id
            )));
        };
        let namespace = names::namespace_for(svc.environment_id);

        svc.generated_domain = Some(names::external_domain(
            &svc.name,
            svc.environment_id,
            None,
            &self.config.domain_suffix,
        ));
        svc.generated_env
            .insert("PORT".to_string(), git_source.port.to_string());
        svc.generated_env
            .insert("SHIPWRIGHT_SERVICE_ID".to_string(), svc.id.to_string());

        let domain = svc.domain().map(str::to_owned);
        let plan = git::plan(svc, &git_source, image, domain.as_deref())?;

        info!(service = %svc.id, %namespace, %image, "Applying git resource set");
        self.apply(&namespace, &plan.workload).await?;
        self.apply(&namespace, &plan.endpoint).await?;
        if let Some(ingress) = &plan.ingress {
            self.apply(&namespace, ingress).await?;
        }
        match &plan.autoscaler {
            Some(hpa) => self.apply(&namespace, hpa).await?,
            // Switching elastic -> static leaves a stale autoscaler behind
            // unless it is removed here.
            None => {
                self.delete_if_exists::<HorizontalPodAutoscaler>(
                    &namespace,
                    &names::release_name(svc),
                )
                .await?
            }
        }
        Ok(())
    }

    async fn apply_managed(&self, svc: &mut Service, host_ip: IpAddr) -> Result<()> {
        let ServiceKind::Managed(instance) = svc.kind.clone() else {
            return Err(Error::InvalidInput(format!(
                "service {} is not a managed service",
                svc.id
            )));
        };
        let namespace = names::namespace_for(svc.environment_id);
        let profile = instance.class.profile();

        // Reuse the port from the previous synthesis: reallocating would
        // change every external connection string clients already hold.
        let port_key = format!("{}_EXTERNAL_PORT", profile.env_prefix);
        let external_port = match svc.generated_env.get(&port_key).and_then(|p| p.parse().ok()) {
            Some(port) => port,
            None => self.allocator.allocate(instance.class, host_ip).await?,
        };

        let console_host = profile.console.map(|console| {
            names::external_domain(
                &svc.name,
                svc.environment_id,
                Some(console.label),
                &self.config.domain_suffix,
            )
        });
        let creds = env::credentials(svc, instance.class);
        let endpoints = ManagedEndpoints {
            internal_host: names::internal_host(svc, &namespace),
            internal_port: profile.primary_port,
            external_host: host_ip,
            external_port,
            console_url: console_host.as_ref().map(|host| format!("https://{host}")),
        };
        svc.generated_env = env::generated_env(svc, instance.class, &endpoints, &creds);
        svc.generated_domain = console_host.clone();

        let plan = managed::plan(
            svc,
            &instance,
            &creds,
            external_port,
            console_host.as_deref(),
        )?;

        info!(
            service = %svc.id,
            %namespace,
            class = %instance.class,
            external_port,
            "Applying managed resource set"
        );
        self.apply(&namespace, &plan.workload).await?;
        self.apply(&namespace, &plan.endpoint).await?;
        self.apply(&namespace, &plan.external).await?;
        if let Some(ingress) = &plan.console_ingress {
            self.apply(&namespace, ingress).await?;
        }
        Ok(())
    }

    async fn git_status(&self, service: &Service, namespace: &str) -> Result<ResourceStatus> {
        let name = names::release_name(service);
        let workload = self
            .get_opt::<Deployment>(namespace, &name)
            .await?
            .map(|d| {
                let spec = d.spec.as_ref();
                WorkloadStatus {
                    desired_replicas: spec.and_then(|s| s.replicas).unwrap_or(0),
                    ready_replicas: d
                        .status
                        .as_ref()
                        .and_then(|s| s.ready_replicas)
                        .unwrap_or(0),
                    image: spec.and_then(|s| {
                        s.template
                            .spec
                            .as_ref()
                            .and_then(|p| p.containers.first())
                            .and_then(|c| c.image.clone())
                    }),
                }
            });
        let endpoint = self
            .get_opt::<KubeService>(namespace, &name)
            .await?
            .map(endpoint_status);
        let ingress = self
            .get_opt::<Ingress>(namespace, &name)
            .await?
            .map(ingress_status);
        let autoscaler = self
            .get_opt::<HorizontalPodAutoscaler>(namespace, &name)
            .await?
            .and_then(|hpa| {
                let spec = hpa.spec?;
                Some(AutoscalerStatus {
                    min_replicas: spec.min_replicas.unwrap_or(1),
                    max_replicas: spec.max_replicas,
                    current_replicas: hpa
                        .status
                        .as_ref()
                        .and_then(|s| s.current_replicas)
                        .unwrap_or(0),
                })
            });
        Ok(ResourceStatus {
            workload,
            endpoint,
            external: None,
            ingress,
            autoscaler,
        })
    }

    async fn managed_status(&self, service: &Service, namespace: &str) -> Result<ResourceStatus> {
        let name = names::release_name(service);
        let workload = self
            .get_opt::<StatefulSet>(namespace, &name)
            .await?
            .map(|sts| {
                let spec = sts.spec.as_ref();
                WorkloadStatus {
                    desired_replicas: spec.and_then(|s| s.replicas).unwrap_or(0),
                    ready_replicas: sts
                        .status
                        .as_ref()
                        .and_then(|s| s.ready_replicas)
                        .unwrap_or(0),
                    image: spec.and_then(|s| {
                        s.template
                            .spec
                            .as_ref()
                            .and_then(|p| p.containers.first())
                            .and_then(|c| c.image.clone())
                    }),
                }
            });
        let endpoint = self
            .get_opt::<KubeService>(namespace, &name)
            .await?
            .map(endpoint_status);
        let external = self
            .get_opt::<KubeService>(namespace, &names::external_name(service))
            .await?
            .map(|svc| ExternalStatus {
                node_ports: svc
                    .spec
                    .and_then(|s| s.ports)
                    .unwrap_or_default()
                    .iter()
                    .filter_map(|p| p.node_port)
                    .collect(),
            });
        let ingress = self
            .get_opt::<Ingress>(namespace, &names::console_name(service))
            .await?
            .map(ingress_status);
        Ok(ResourceStatus {
            workload,
            endpoint,
            external,
            ingress,
            autoscaler: None,
        })
    }
}

fn endpoint_status(svc: KubeService) -> EndpointStatus {
    let spec = svc.spec.unwrap_or_default();
    EndpointStatus {
        cluster_ip: spec.cluster_ip,
        ports: spec
            .ports
            .unwrap_or_default()
            .iter()
            .map(|p| p.port)
            .collect(),
    }
}

fn ingress_status(ingress: Ingress) -> IngressStatus {
    IngressStatus {
        hosts: ingress
            .spec
            .and_then(|s| s.rules)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|r| r.host)
            .collect(),
    }
}

#[async_trait]
impl Synthesizer for KubeSynthesizer {
    async fn deploy_git(
        &self,
        image: &str,
        service: &Service,
    ) -> std::result::Result<Service, SynthesisFailure> {
        let mut svc = service.clone();
        match self.apply_git(image, &mut svc).await {
            Ok(()) => {
                svc.status = ServiceStatus::Running;
                Ok(svc)
            }
            Err(error) => {
                warn!(service = %svc.id, %error, "Git synthesis failed");
                Err(SynthesisFailure {
                    partial: svc,
                    error,
                })
            }
        }
    }

    async fn deploy_managed(
        &self,
        service: &Service,
        host_ip: IpAddr,
    ) -> std::result::Result<Service, SynthesisFailure> {
        let mut svc = service.clone();
        match self.apply_managed(&mut svc, host_ip).await {
            Ok(()) => {
                svc.status = ServiceStatus::Running;
                Ok(svc)
            }
            Err(error) => {
                warn!(service = %svc.id, %error, "Managed synthesis failed");
                Err(SynthesisFailure {
                    partial: svc,
                    error,
                })
            }
        }
    }

    async fn resource_status(&self, service: &Service) -> Result<ResourceStatus> {
        let namespace = names::namespace_for(service.environment_id);
        match &service.kind {
            ServiceKind::Git(_) => self.git_status(service, &namespace).await,
            ServiceKind::Managed(_) => self.managed_status(service, &namespace).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use shipwright_core::service::Scaling;
    use shipwright_core::ResourceId;
    use shipwright_core::service::{GitSource, ResourceLimits};
    use std::collections::BTreeMap;

    fn git_service(scaling: Scaling) -> Service {
        Service {
            id: ResourceId::new(),
            project_id: ResourceId::new(),
            environment_id: ResourceId::new(),
            name: "web".to_string(),
            kind: ServiceKind::Git(GitSource {
                repo_url: "https://example.com/org/web.git".parse().unwrap(),
                branch: "main".to_string(),
                port: 8080,
                build_command: None,
                start_command: None,
            }),
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
        }
    }

    #[test]
    fn default_config_reads_a_suffix() {
        let config = SynthesizerConfig::default();
        assert!(!config.domain_suffix.is_empty());
    }

    #[test]
    fn elastic_plan_has_autoscaler_static_plan_does_not() {
        let service = git_service(Scaling::Elastic { min: 1, max: 5 });
        let ServiceKind::Git(git_source) = service.kind.clone() else {
            unreachable!()
        };
        let plan = git::plan(&service, &git_source, "registry/web:v1", None).unwrap();
        assert!(plan.autoscaler.is_some());

        let service = git_service(Scaling::Static { replicas: 2 });
        let plan = git::plan(&service, &git_source, "registry/web:v1", None).unwrap();
        assert!(plan.autoscaler.is_none());
        assert_eq!(plan.workload.spec.unwrap().replicas, Some(2));
    }
}

/// Integration tests that need a reachable cluster and a namespace named
/// after the fixture environment. Run with: cargo test -- --ignored
#[cfg(test)]
mod integration_tests {
    use super::*;
    use chrono::Utc;
    use shipwright_core::ResourceId;
    use shipwright_core::service::{GitSource, ResourceLimits, Scaling};
    use std::collections::BTreeMap;

    #[tokio::test]
    #[ignore]
    async fn deploy_git_round_trips_through_resource_status() {
        let client = Client::try_default().await.unwrap();
        let synthesizer = KubeSynthesizer::new(client, SynthesizerConfig::default());

        let service = Service {
            id: ResourceId::new(),
            project_id: ResourceId::new(),
            environment_id: ResourceId::new(),
            name: "smoke".to_string(),
            kind: ServiceKind::Git(GitSource {
                repo_url: "https://example.com/org/smoke.git".parse().unwrap(),
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
            deploy_secret: "s".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let deployed = synthesizer
            .deploy_git("nginx:alpine", &service)
            .await
            .expect("synthesis should succeed");
        assert_eq!(deployed.status, ServiceStatus::Running);

        let status = synthesizer.resource_status(&deployed).await.unwrap();
        assert!(status.workload.is_some());
        assert!(status.endpoint.is_some());
    }
}
