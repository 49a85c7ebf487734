//! Deployment lifecycle orchestration.
//!
//! `create_deployment` validates, persists a `building` record and returns
//! immediately; everything after that runs detached. The state machine is
//! `building -> {success, failed}`, each terminal reached exactly once,
//! with no automatic retry. Concurrent deployments for one service are
//! deliberately not serialized; the last to finish determines visible
//! resource state.

use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};
use url::Url;

use shipwright_core::build::{BuildRequest, ImageBuilder};
use shipwright_core::deployment::{Deployment, DeploymentStatus};
use shipwright_core::service::{Service, ServiceKind, ServiceStatus};
use shipwright_core::synth::{ResourceStatus, Synthesizer};
use shipwright_core::{Error, ResourceId, Result};
use shipwright_db::{DbError, DeploymentRepo, ServiceRepo};

use crate::notifier::{WebhookNotifier, WebhookPayload};
use crate::pipelines::PipelineSet;

/// A validated trigger request.
#[derive(Debug, Clone)]
pub struct CreateDeployment {
    pub service_id: ResourceId,
    pub credential: String,
    pub commit_sha: Option<String>,
    pub commit_message: Option<String>,
    pub callback_url: Option<Url>,
}

/// What the caller gets back while the pipeline runs detached.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentReceipt {
    pub deployment_id: ResourceId,
    pub service_id: ResourceId,
    pub status: DeploymentStatus,
    pub job_reference: String,
    pub created_at: DateTime<Utc>,
}

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Node address managed-service ports are probed and bound on.
    pub host_ip: IpAddr,
    /// Registry prefix for built images.
    pub registry: String,
}

fn map_db(err: DbError) -> Error {
    match err {
        DbError::NotFound(msg) => Error::NotFound(msg),
        DbError::Conflict(msg) => Error::Conflict(msg),
        other => Error::Internal(other.to_string()),
    }
}

/// Compare a presented credential against the stored secret. Both sides
/// are hashed so comparison time does not depend on where they differ.
fn credential_matches(expected: &str, presented: &str) -> bool {
    Sha256::digest(expected.as_bytes()) == Sha256::digest(presented.as_bytes())
}

struct PipelineFailure {
    partial: Option<Service>,
    error: Error,
}

/// Owns the deployment lifecycle.
pub struct DeploymentOrchestrator {
    services: Arc<dyn ServiceRepo>,
    deployments: Arc<dyn DeploymentRepo>,
    builder: Arc<dyn ImageBuilder>,
    synthesizer: Arc<dyn Synthesizer>,
    notifier: WebhookNotifier,
    pipelines: PipelineSet,
    config: OrchestratorConfig,
}

impl DeploymentOrchestrator {
    pub fn new(
        services: Arc<dyn ServiceRepo>,
        deployments: Arc<dyn DeploymentRepo>,
        builder: Arc<dyn ImageBuilder>,
        synthesizer: Arc<dyn Synthesizer>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            services,
            deployments,
            builder,
            synthesizer,
            notifier: WebhookNotifier::new(),
            pipelines: PipelineSet::new(),
            config,
        }
    }

    /// Accept a trigger: authorize, persist a `building` deployment, spawn
    /// the pipeline detached and return at once.
    pub async fn create_deployment(
        self: &Arc<Self>,
        request: CreateDeployment,
    ) -> Result<DeploymentReceipt> {
        let service = self
            .services
            .get(request.service_id)
            .await
            .map_err(map_db)?;

        if !credential_matches(&service.deploy_secret, &request.credential) {
            return Err(Error::Unauthorized(format!(
                "credential mismatch for service {}",
                service.id
            )));
        }

        // Commit metadata only makes sense for source-built services.
        let (commit_sha, commit_message) = match &service.kind {
            ServiceKind::Git(_) => (request.commit_sha, request.commit_message),
            ServiceKind::Managed(_) => (None, None),
        };
        let deployment = Deployment::new(service.id, commit_sha, commit_message);
        self.deployments.create(&deployment).await.map_err(map_db)?;
        self.services
            .set_status(service.id, ServiceStatus::Building)
            .await
            .map_err(map_db)?;

        let receipt = DeploymentReceipt {
            deployment_id: deployment.id,
            service_id: service.id,
            status: deployment.status,
            job_reference: deployment.job_reference(),
            created_at: deployment.created_at,
        };

        self.pipelines.register(deployment.id);
        let this = Arc::clone(self);
        let callback = request.callback_url;
        let handle = tokio::spawn(async move {
            this.run_pipeline(deployment, service, callback).await;
        });
        self.pipelines.attach(receipt.deployment_id, handle);

        Ok(receipt)
    }

    /// Read-only cross-check of a service's resource set against the
    /// cluster.
    pub async fn resource_status(&self, service: &Service) -> Result<ResourceStatus> {
        self.synthesizer.resource_status(service).await
    }

    /// Deployment ids with an outstanding pipeline.
    pub fn active_pipelines(&self) -> Vec<ResourceId> {
        self.pipelines.active()
    }

    /// Await every outstanding pipeline; the single shutdown path.
    pub async fn drain(&self) {
        self.pipelines.drain().await;
    }

    async fn run_pipeline(
        self: Arc<Self>,
        deployment: Deployment,
        service: Service,
        callback: Option<Url>,
    ) {
        let id = deployment.id;
        info!(deployment = %id, service = %service.id, "Starting deployment pipeline");

        match self.build_and_synthesize(&deployment, &service).await {
            Ok(updated) => {
                if let Err(e) = self
                    .deployments
                    .finish(id, DeploymentStatus::Success, None)
                    .await
                {
                    warn!(deployment = %id, error = %e, "Failed to record success");
                }
                if let Err(e) = self.services.record_deploy_outcome(&updated).await {
                    warn!(deployment = %id, error = %e, "Failed to persist service state");
                }
                info!(deployment = %id, "Deployment succeeded");
                self.send_webhook(callback, id, "running", None);
            }
            Err(failure) => {
                let message = failure.error.to_string();
                error!(deployment = %id, error = %message, "Deployment failed");
                if let Err(e) = self
                    .deployments
                    .finish(id, DeploymentStatus::Failed, Some(&message))
                    .await
                {
                    warn!(deployment = %id, error = %e, "Failed to record failure");
                }
                // Best-effort: keep whatever the synthesizer got to before
                // it stopped.
                let mut service = failure.partial.unwrap_or(service);
                service.status = ServiceStatus::Failed;
                if let Err(e) = self.services.record_deploy_outcome(&service).await {
                    warn!(deployment = %id, error = %e, "Failed to persist service state");
                }
                self.send_webhook(callback, id, "failed", Some(message));
            }
        }

        self.pipelines.complete(id);
    }

    async fn build_and_synthesize(
        &self,
        deployment: &Deployment,
        service: &Service,
    ) -> std::result::Result<Service, PipelineFailure> {
        match &service.kind {
            ServiceKind::Git(git) => {
                let request = BuildRequest {
                    deployment_id: deployment.id,
                    service_id: service.id,
                    repo_url: git.repo_url.clone(),
                    branch: git.branch.clone(),
                    commit_sha: deployment.commit_sha.clone(),
                    build_command: git.build_command.clone(),
                    image_tag: self.image_tag(service, deployment),
                };
                let image = self.builder.build(request).await.map_err(|error| {
                    PipelineFailure {
                        partial: None,
                        error,
                    }
                })?;
                info!(deployment = %deployment.id, image = %image.reference, "Build finished");

                if let Err(e) = self
                    .deployments
                    .set_image(deployment.id, &image.reference)
                    .await
                {
                    warn!(deployment = %deployment.id, error = %e, "Failed to record image");
                }

                self.synthesizer
                    .deploy_git(&image.reference, service)
                    .await
                    .map_err(|failure| PipelineFailure {
                        partial: Some(failure.partial),
                        error: failure.error,
                    })
            }
            // Managed services have nothing to build; they go straight to
            // synthesis.
            ServiceKind::Managed(_) => self
                .synthesizer
                .deploy_managed(service, self.config.host_ip)
                .await
                .map_err(|failure| PipelineFailure {
                    partial: Some(failure.partial),
                    error: failure.error,
                }),
        }
    }

    fn image_tag(&self, service: &Service, deployment: &Deployment) -> String {
        let tag = deployment
            .commit_sha
            .as_deref()
            .map(|sha| sha.chars().take(12).collect::<String>())
            .unwrap_or_else(|| deployment.id.short());
        format!("{}/svc-{}:{tag}", self.config.registry, service.id.short())
    }

    fn send_webhook(
        &self,
        callback: Option<Url>,
        deployment_id: ResourceId,
        status: &'static str,
        error: Option<String>,
    ) {
        if let Some(url) = callback {
            self.notifier.notify(
                url,
                WebhookPayload {
                    deployment_id,
                    status,
                    error,
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use shipwright_core::build::BuiltImage;
    use shipwright_core::service::{GitSource, ManagedInstance, ResourceLimits, Scaling};
    use shipwright_core::synth::SynthesisFailure;
    use shipwright_db::DbResult;
    use std::collections::{BTreeMap, HashMap};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    // In-memory repos mirroring the SQL contracts, including the
    // exactly-once guard on finish.

    #[derive(Default)]
    struct MemServiceRepo {
        services: Mutex<HashMap<ResourceId, Service>>,
    }

    #[async_trait]
    impl ServiceRepo for MemServiceRepo {
        async fn get(&self, id: ResourceId) -> DbResult<Service> {
            self.services
                .lock()
                .unwrap()
                .get(&id)
                .cloned()
                .ok_or_else(|| DbError::NotFound(format!("service {id}")))
        }

        async fn set_status(&self, id: ResourceId, status: ServiceStatus) -> DbResult<()> {
            let mut services = self.services.lock().unwrap();
            let service = services
                .get_mut(&id)
                .ok_or_else(|| DbError::NotFound(format!("service {id}")))?;
            service.status = status;
            Ok(())
        }

        async fn record_deploy_outcome(&self, updated: &Service) -> DbResult<()> {
            let mut services = self.services.lock().unwrap();
            let service = services
                .get_mut(&updated.id)
                .ok_or_else(|| DbError::NotFound(format!("service {}", updated.id)))?;
            service.status = updated.status;
            service.generated_domain = updated.generated_domain.clone();
            service.generated_env = updated.generated_env.clone();
            Ok(())
        }
    }

    #[derive(Default)]
    struct MemDeploymentRepo {
        deployments: Mutex<HashMap<ResourceId, Deployment>>,
    }

    #[async_trait]
    impl DeploymentRepo for MemDeploymentRepo {
        async fn create(&self, deployment: &Deployment) -> DbResult<()> {
            self.deployments
                .lock()
                .unwrap()
                .insert(deployment.id, deployment.clone());
            Ok(())
        }

        async fn get(&self, id: ResourceId) -> DbResult<Deployment> {
            self.deployments
                .lock()
                .unwrap()
                .get(&id)
                .cloned()
                .ok_or_else(|| DbError::NotFound(format!("deployment {id}")))
        }

        async fn set_image(&self, id: ResourceId, image: &str) -> DbResult<()> {
            let mut deployments = self.deployments.lock().unwrap();
            let deployment = deployments
                .get_mut(&id)
                .ok_or_else(|| DbError::NotFound(format!("deployment {id}")))?;
            if deployment.image.is_some() {
                return Err(DbError::Conflict(format!(
                    "deployment {id} already has an image"
                )));
            }
            deployment.image = Some(image.to_string());
            Ok(())
        }

        async fn finish(
            &self,
            id: ResourceId,
            status: DeploymentStatus,
            error: Option<&str>,
        ) -> DbResult<()> {
            let mut deployments = self.deployments.lock().unwrap();
            let deployment = deployments
                .get_mut(&id)
                .ok_or_else(|| DbError::NotFound(format!("deployment {id}")))?;
            if deployment.status != DeploymentStatus::Building {
                return Err(DbError::Conflict(format!(
                    "deployment {id} already reached a terminal state"
                )));
            }
            deployment.status = status;
            deployment.error = error.map(str::to_owned);
            deployment.finished_at = Some(Utc::now());
            Ok(())
        }

        async fn latest_for_service(
            &self,
            service_id: ResourceId,
        ) -> DbResult<Option<Deployment>> {
            Ok(self
                .deployments
                .lock()
                .unwrap()
                .values()
                .filter(|d| d.service_id == service_id)
                .max_by_key(|d| d.created_at)
                .cloned())
        }

        async fn latest_successful(
            &self,
            service_id: ResourceId,
        ) -> DbResult<Option<Deployment>> {
            Ok(self
                .deployments
                .lock()
                .unwrap()
                .values()
                .filter(|d| {
                    d.service_id == service_id && d.status == DeploymentStatus::Success
                })
                .max_by_key(|d| d.created_at)
                .cloned())
        }
    }

    struct MockBuilder {
        fail: bool,
        called: AtomicBool,
    }

    impl MockBuilder {
        fn ok() -> Self {
            Self {
                fail: false,
                called: AtomicBool::new(false),
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                called: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl ImageBuilder for MockBuilder {
        async fn build(&self, request: BuildRequest) -> shipwright_core::Result<BuiltImage> {
            self.called.store(true, Ordering::SeqCst);
            if self.fail {
                Err(Error::BuildFailed("compile error".to_string()))
            } else {
                Ok(BuiltImage {
                    reference: request.image_tag,
                })
            }
        }
    }

    struct MockSynthesizer {
        fail: bool,
    }

    #[async_trait]
    impl Synthesizer for MockSynthesizer {
        async fn deploy_git(
            &self,
            _image: &str,
            service: &Service,
        ) -> std::result::Result<Service, SynthesisFailure> {
            let mut updated = service.clone();
            updated
                .generated_env
                .insert("SYNTH".to_string(), "applied".to_string());
            if self.fail {
                Err(SynthesisFailure {
                    partial: updated,
                    error: Error::SynthesisFailed("apply refused".to_string()),
                })
            } else {
                updated.status = ServiceStatus::Running;
                updated.generated_domain = Some("web-x.apps.example".to_string());
                Ok(updated)
            }
        }

        async fn deploy_managed(
            &self,
            service: &Service,
            _host_ip: IpAddr,
        ) -> std::result::Result<Service, SynthesisFailure> {
            let mut updated = service.clone();
            updated
                .generated_env
                .insert("SYNTH".to_string(), "applied".to_string());
            if self.fail {
                Err(SynthesisFailure {
                    partial: updated,
                    error: Error::SynthesisFailed("apply refused".to_string()),
                })
            } else {
                updated.status = ServiceStatus::Running;
                Ok(updated)
            }
        }

        async fn resource_status(
            &self,
            _service: &Service,
        ) -> shipwright_core::Result<ResourceStatus> {
            Ok(ResourceStatus::default())
        }
    }

    fn git_service() -> Service {
        Service {
            id: ResourceId::new(),
            project_id: ResourceId::new(),
            environment_id: ResourceId::new(),
            name: "web".to_string(),
            kind: ServiceKind::Git(GitSource {
                repo_url: "https://example.com/org/web.git".parse().unwrap(),
                branch: "main".to_string(),
                port: 8080,
                build_command: Some("npm run build".to_string()),
                start_command: None,
            }),
            limits: ResourceLimits::default(),
            scaling: Scaling::Static { replicas: 1 },
            custom_domain: None,
            generated_domain: None,
            declared_env: BTreeMap::new(),
            generated_env: BTreeMap::new(),
            status: ServiceStatus::Inactive,
            deploy_secret: "topsecret".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn managed_service() -> Service {
        let mut service = git_service();
        service.kind = ServiceKind::Managed(ManagedInstance {
            class: shipwright_core::managed::ManagedClass::Postgres,
            version: None,
            storage_gb: 5,
        });
        service
    }

    struct Harness {
        orchestrator: Arc<DeploymentOrchestrator>,
        services: Arc<MemServiceRepo>,
        deployments: Arc<MemDeploymentRepo>,
        builder: Arc<MockBuilder>,
    }

    fn harness(service: Service, builder: MockBuilder, synth_fails: bool) -> Harness {
        let services = Arc::new(MemServiceRepo::default());
        services
            .services
            .lock()
            .unwrap()
            .insert(service.id, service);
        let deployments = Arc::new(MemDeploymentRepo::default());
        let builder = Arc::new(builder);
        let orchestrator = Arc::new(DeploymentOrchestrator::new(
            services.clone(),
            deployments.clone(),
            builder.clone(),
            Arc::new(MockSynthesizer { fail: synth_fails }),
            OrchestratorConfig {
                host_ip: "127.0.0.1".parse().unwrap(),
                registry: "registry.local:5000".to_string(),
            },
        ));
        Harness {
            orchestrator,
            services,
            deployments,
            builder,
        }
    }

    fn request(service: &Service, credential: &str) -> CreateDeployment {
        CreateDeployment {
            service_id: service.id,
            credential: credential.to_string(),
            commit_sha: Some("abc123def4567890".to_string()),
            commit_message: Some("ship it".to_string()),
            callback_url: None,
        }
    }

    #[tokio::test]
    async fn wrong_credential_is_rejected_before_anything_persists() {
        let service = git_service();
        let h = harness(service.clone(), MockBuilder::ok(), false);

        let err = h
            .orchestrator
            .create_deployment(request(&service, "wrong"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Unauthorized(_)));
        assert!(h.deployments.deployments.lock().unwrap().is_empty());
        assert!(h.orchestrator.active_pipelines().is_empty());
    }

    #[tokio::test]
    async fn correct_credential_authorizes_regardless_of_history() {
        let service = git_service();
        let h = harness(service.clone(), MockBuilder::ok(), false);

        for _ in 0..3 {
            h.orchestrator
                .create_deployment(request(&service, "topsecret"))
                .await
                .expect("correct secret must always authorize");
            h.orchestrator.drain().await;
        }
    }

    #[tokio::test]
    async fn successful_pipeline_reaches_success_exactly_once() {
        let service = git_service();
        let h = harness(service.clone(), MockBuilder::ok(), false);

        let receipt = h
            .orchestrator
            .create_deployment(request(&service, "topsecret"))
            .await
            .unwrap();
        assert_eq!(receipt.status, DeploymentStatus::Building);
        assert_eq!(
            receipt.job_reference,
            format!("build-{}", receipt.deployment_id)
        );

        h.orchestrator.drain().await;

        let deployment = h.deployments.get(receipt.deployment_id).await.unwrap();
        assert_eq!(deployment.status, DeploymentStatus::Success);
        assert!(deployment.image.as_deref().unwrap().contains("registry.local:5000"));
        assert!(deployment.image.as_deref().unwrap().ends_with("abc123def456"));

        let stored = h.services.get(service.id).await.unwrap();
        assert_eq!(stored.status, ServiceStatus::Running);
        assert_eq!(stored.generated_domain.as_deref(), Some("web-x.apps.example"));

        // Terminal states are reachable exactly once.
        let err = h
            .deployments
            .finish(receipt.deployment_id, DeploymentStatus::Failed, None)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Conflict(_)));
        let deployment = h.deployments.get(receipt.deployment_id).await.unwrap();
        assert_eq!(deployment.status, DeploymentStatus::Success);
    }

    #[tokio::test]
    async fn build_failure_marks_the_deployment_failed() {
        let service = git_service();
        let h = harness(service.clone(), MockBuilder::failing(), false);

        let receipt = h
            .orchestrator
            .create_deployment(request(&service, "topsecret"))
            .await
            .unwrap();
        h.orchestrator.drain().await;

        let deployment = h.deployments.get(receipt.deployment_id).await.unwrap();
        assert_eq!(deployment.status, DeploymentStatus::Failed);
        assert!(deployment.error.as_deref().unwrap().contains("compile error"));
        assert!(deployment.image.is_none());

        let stored = h.services.get(service.id).await.unwrap();
        assert_eq!(stored.status, ServiceStatus::Failed);
    }

    #[tokio::test]
    async fn synthesis_failure_persists_the_partial_service_state() {
        let service = git_service();
        let h = harness(service.clone(), MockBuilder::ok(), true);

        let receipt = h
            .orchestrator
            .create_deployment(request(&service, "topsecret"))
            .await
            .unwrap();
        h.orchestrator.drain().await;

        let deployment = h.deployments.get(receipt.deployment_id).await.unwrap();
        assert_eq!(deployment.status, DeploymentStatus::Failed);
        // The image was built and recorded before synthesis refused.
        assert!(deployment.image.is_some());

        let stored = h.services.get(service.id).await.unwrap();
        assert_eq!(stored.status, ServiceStatus::Failed);
        assert_eq!(stored.generated_env.get("SYNTH").unwrap(), "applied");
    }

    #[tokio::test]
    async fn managed_services_skip_the_build_step() {
        let service = managed_service();
        let h = harness(service.clone(), MockBuilder::ok(), false);

        let receipt = h
            .orchestrator
            .create_deployment(request(&service, "topsecret"))
            .await
            .unwrap();
        h.orchestrator.drain().await;

        assert!(!h.builder.called.load(Ordering::SeqCst));
        let deployment = h.deployments.get(receipt.deployment_id).await.unwrap();
        assert_eq!(deployment.status, DeploymentStatus::Success);
        // No commit metadata on a provisioned service.
        assert!(deployment.commit_sha.is_none());
    }

    #[tokio::test]
    async fn pipeline_set_empties_after_drain() {
        let service = git_service();
        let h = harness(service.clone(), MockBuilder::ok(), false);

        h.orchestrator
            .create_deployment(request(&service, "topsecret"))
            .await
            .unwrap();
        h.orchestrator.drain().await;
        assert!(h.orchestrator.active_pipelines().is_empty());
    }

    #[test]
    fn credential_comparison_is_exact() {
        assert!(credential_matches("secret", "secret"));
        assert!(!credential_matches("secret", "secre"));
        assert!(!credential_matches("secret", "secret "));
        assert!(!credential_matches("secret", ""));
    }
}
